use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use mirror_core::annotate::Annotator;
use mirror_core::{EmotionClassifier, EmotionPipeline, FaceDetector, PipelineConfig, PredictionResult};
use mirror_hw::Camera;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mirror", about = "Affect Mirror emotion inference diagnostics")]
struct Cli {
    /// Directory containing the ONNX models (default: $MIRROR_MODEL_DIR or ./models)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict the emotion shown in one or more still images
    Predict {
        /// Image files to classify
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Print one JSON object per image
        #[arg(long)]
        json: bool,
        /// Write copies with the face outlined and labelled into this directory
        #[arg(long, value_name = "DIR")]
        annotate: Option<PathBuf>,
        /// Smoothing window across the given images (1 treats each image alone)
        #[arg(long, default_value_t = 1)]
        window: usize,
    },
    /// Show which models are available and which backend is active
    Status,
    /// List V4L2 capture devices
    Devices,
    /// Capture one camera frame and run the pipeline on it
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the annotated frame to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let model_dir = cli.model_dir.unwrap_or_else(mirror_core::default_model_dir);

    match cli.command {
        Commands::Predict {
            images,
            json,
            annotate: annotate_dir,
            window,
        } => {
            let config = PipelineConfig {
                window_size: window,
                ..PipelineConfig::from_model_dir(&model_dir)
            };
            let mut pipeline = EmotionPipeline::load(&config).context("loading emotion pipeline")?;

            let annotator = match &annotate_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
                    Some(Annotator::from_env())
                }
                None => None,
            };

            for path in &images {
                let mut image = image::open(path)
                    .with_context(|| format!("reading {}", path.display()))?
                    .to_rgb8();
                let (width, height) = image.dimensions();
                let result = pipeline.predict(image.as_raw(), width, height);

                if json {
                    let line = serde_json::json!({ "image": path, "result": result });
                    println!("{line}");
                } else {
                    print_result(path, &result);
                }

                if let (Some(dir), Some(annotator)) = (&annotate_dir, &annotator) {
                    annotator.annotate(&mut image, &result);
                    let out = annotated_path(dir, path);
                    image.save(&out).with_context(|| format!("writing {}", out.display()))?;
                    tracing::debug!(path = %out.display(), "annotated image written");
                }
            }
        }
        Commands::Status => {
            let config = PipelineConfig::from_model_dir(&model_dir);
            println!("Model directory: {}", model_dir.display());

            for (role, path) in [
                ("detector", &config.detector_model),
                ("quantized", &config.quantized_model),
                ("full-precision", &config.full_precision_model),
            ] {
                let state = if path.exists() { "found" } else { "missing" };
                println!("  {role:<15} {state:<8} {}", path.display());
            }

            match FaceDetector::load(&config.detector_model) {
                Ok(_) => println!("Face detector: ready"),
                Err(e) => println!("Face detector: unavailable ({e})"),
            }

            let classifier = EmotionClassifier::load(&config.quantized_model, &config.full_precision_model);
            match classifier.backend_kind() {
                Some(kind) => {
                    let spec = classifier.input_spec();
                    println!(
                        "Emotion classifier: {kind} ({}x{} {:?})",
                        spec.edge, spec.edge, spec.layout
                    );
                }
                None => println!("Emotion classifier: unavailable (faces report Neutral)"),
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test { device, output } => {
            println!("Running camera diagnostics on {device}...");
            let camera = Camera::open(&device).with_context(|| format!("opening {device}"))?;
            println!(
                "Negotiated {}x{} {:?}",
                camera.width,
                camera.height,
                camera.pixel_format()
            );

            let frame = camera.capture_frame().context("capturing frame")?;
            let mut pipeline =
                EmotionPipeline::load(&PipelineConfig::from_model_dir(&model_dir)).context("loading emotion pipeline")?;
            let result = pipeline.predict(&frame.data, frame.width, frame.height);
            println!("Frame {}: {result}", frame.sequence);

            if let Some(out) = output {
                let Some(mut image) = RgbImage::from_raw(frame.width, frame.height, frame.data) else {
                    bail!("captured frame has inconsistent dimensions");
                };
                Annotator::from_env().annotate(&mut image, &result);
                image.save(&out).with_context(|| format!("writing {}", out.display()))?;
                println!("Saved {}", out.display());
            }
        }
    }

    Ok(())
}

fn print_result(path: &Path, result: &PredictionResult) {
    println!("{}: {result}", path.display());
    if let Some(region) = result.bbox {
        println!(
            "  face at ({}, {}) {}x{}",
            region.x, region.y, region.width, region.height
        );
    }
    for (label, p) in &result.probabilities {
        println!("  {label:<9} {:5.1}%", p * 100.0);
    }
}

/// `<dir>/<stem>_annotated.png` for an input image path.
fn annotated_path(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    dir.join(format!("{stem}_annotated.png"))
}
