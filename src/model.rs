use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::FilterType;
use serde::Serialize;
use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor};

use crate::error::ModelError;

/// Side length the network was trained on.
pub const IMAGE_SIZE: u32 = 256;

/// Output order of the network, same as the training set folders.
pub const CLASS_NAMES: [&str; 9] = [
    "Aphid",
    "Brown Rust",
    "Healthy",
    "Leaf Blight",
    "Mildew",
    "Mite",
    "Septoria",
    "Smut",
    "Yellow Rust",
];

/// A decoded image laid out as NHWC `f32` with a batch of one.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

/// Anything that turns a preprocessed image into one score per class.
pub trait Classifier: Send + Sync {
    fn scores(&self, input: &ImageInput) -> Result<Vec<f32>, ModelError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

impl Prediction {
    /// Picks the best scoring class. `confidence` is a percentage rounded to
    /// two decimals.
    pub fn from_scores(scores: &[f32], labels: &[&str]) -> Result<Self, ModelError> {
        if scores.len() != labels.len() {
            return Err(ModelError::ScoreCount {
                expected: labels.len(),
                actual: scores.len(),
            });
        }

        let (index, score) = scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| !score.is_nan())
            .fold(None, |best: Option<(usize, f32)>, (i, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((i, score)),
            })
            .ok_or(ModelError::EmptyOutput)?;

        Ok(Prediction {
            label: labels[index].to_string(),
            confidence: (f64::from(score) * 100.0 * 100.0).round() / 100.0,
        })
    }
}

/// Decodes the file by content, converts to RGB and resizes to
/// `IMAGE_SIZE`x`IMAGE_SIZE`. Pixel values stay in 0..=255; the EfficientNet
/// graph rescales internally.
pub fn preprocess(path: &Path) -> Result<ImageInput, ModelError> {
    let image = image::io::Reader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(ModelError::ReadImage)?
        .decode()?;

    let rgb = image
        .resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::Nearest)
        .to_rgb8();

    let data = rgb
        .pixels()
        .flat_map(|pixel| pixel.0)
        .map(f32::from)
        .collect();

    Ok(ImageInput {
        width: IMAGE_SIZE,
        height: IMAGE_SIZE,
        data,
    })
}

pub fn classify(classifier: &dyn Classifier, path: &Path) -> Result<Prediction, ModelError> {
    let input = preprocess(path)?;
    let scores = classifier.scores(&input)?;
    Prediction::from_scores(&scores, &CLASS_NAMES)
}

/// Keeps the first row of a `[rows, classes]` output. Models exported with
/// several heads or a batch dimension report more than one row.
fn first_row(mut values: Vec<f32>, dims: &[u64]) -> Vec<f32> {
    if dims.len() >= 2 {
        if let Some(&width) = dims.last() {
            values.truncate(width as usize);
        }
    }
    values
}

struct Loaded {
    graph: Graph,
    session: Session,
}

/// Frozen TensorFlow graph with a single image input and a softmax output.
pub struct TensorflowModel {
    loaded: Mutex<Loaded>,
    input_op: String,
    output_op: String,
    path: PathBuf,
}

impl TensorflowModel {
    pub fn load(
        model_path: &Path,
        input_op: &str,
        output_op: &str,
    ) -> Result<Self, ModelError> {
        let model_bytes = fs::read(model_path).map_err(|source| ModelError::Io {
            path: model_path.to_path_buf(),
            source,
        })?;

        let mut graph = Graph::new();
        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;

        for name in [input_op, output_op] {
            if graph.operation_by_name(name).map_err(tensorflow::Status::from)?.is_none() {
                return Err(ModelError::MissingOperation(name.to_string()));
            }
        }

        let session = Session::new(&SessionOptions::new(), &graph)?;

        Ok(TensorflowModel {
            loaded: Mutex::new(Loaded { graph, session }),
            input_op: input_op.to_string(),
            output_op: output_op.to_string(),
            path: model_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Classifier for TensorflowModel {
    fn scores(&self, input: &ImageInput) -> Result<Vec<f32>, ModelError> {
        let mut tensor = Tensor::new(&[1, u64::from(input.height), u64::from(input.width), 3]);
        tensor.copy_from_slice(&input.data);

        let loaded = self.loaded.lock().map_err(|_| ModelError::Poisoned)?;

        let input_operation = loaded
            .graph
            .operation_by_name(&self.input_op).map_err(tensorflow::Status::from)?
            .ok_or_else(|| ModelError::MissingOperation(self.input_op.clone()))?;
        let output_operation = loaded
            .graph
            .operation_by_name(&self.output_op).map_err(tensorflow::Status::from)?
            .ok_or_else(|| ModelError::MissingOperation(self.output_op.clone()))?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        loaded.session.run(&mut args)?;

        let output: Tensor<f32> = args.fetch(output_token)?;
        let dims = output.dims().to_vec();
        Ok(first_row(output.to_vec(), &dims))
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgb};
    use tensorflow::{DataType, Output};

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cropcare-{}-{}", uuid::Uuid::new_v4(), name))
    }

    #[test]
    fn picks_highest_score_and_rounds_confidence() {
        let scores = [0.01, 0.02, 0.876543, 0.03, 0.0, 0.0, 0.0, 0.0, 0.064];
        let prediction = Prediction::from_scores(&scores, &CLASS_NAMES).unwrap();
        assert_eq!(prediction.label, "Healthy");
        assert_eq!(prediction.confidence, 87.65);
    }

    #[test]
    fn ties_resolve_to_first_class() {
        let scores = [0.5, 0.5];
        let prediction = Prediction::from_scores(&scores, &["a", "b"]).unwrap();
        assert_eq!(prediction.label, "a");
        assert_eq!(prediction.confidence, 50.0);
    }

    #[test]
    fn score_count_must_match_labels() {
        let err = Prediction::from_scores(&[0.2, 0.8], &CLASS_NAMES).unwrap_err();
        assert!(matches!(
            err,
            ModelError::ScoreCount {
                expected: 9,
                actual: 2
            }
        ));
    }

    #[test]
    fn empty_output_is_an_error() {
        let err = Prediction::from_scores(&[], &[]).unwrap_err();
        assert!(matches!(err, ModelError::EmptyOutput));
    }

    #[test]
    fn first_row_of_multi_row_output() {
        let values = vec![0.1, 0.9, 0.7, 0.3];
        assert_eq!(first_row(values.clone(), &[2, 2]), vec![0.1, 0.9]);
        assert_eq!(first_row(values.clone(), &[4]), values);
    }

    #[test]
    fn preprocess_resizes_to_network_input() {
        let path = temp_path("leaf.png");
        let image = ImageBuffer::from_fn(40, 20, |x, _| Rgb([x as u8 * 6, 200, 0]));
        image.save(&path).unwrap();

        let input = preprocess(&path).unwrap();
        assert_eq!((input.width, input.height), (IMAGE_SIZE, IMAGE_SIZE));
        assert_eq!(input.data.len(), (IMAGE_SIZE * IMAGE_SIZE * 3) as usize);
        assert!(input.data.iter().all(|v| (0.0..=255.0).contains(v)));
        assert_eq!(input.data[1], 200.0);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn preprocess_sniffs_format_instead_of_trusting_extension() {
        let path = temp_path("actually-a-png.jpg");
        ImageBuffer::from_pixel(8, 8, Rgb([1u8, 2, 3]))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        assert!(preprocess(&path).is_ok());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn truncated_jpeg_fails_to_decode() {
        let path = temp_path("leaf.jpg");
        fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F']).unwrap();

        let err = preprocess(&path).unwrap_err();
        assert!(!err.to_string().is_empty());

        fs::remove_file(path).unwrap();
    }

    /// Writes a graph whose `Identity` op reshapes the NHWC input to
    /// `[pixels, 3]`, so every pixel becomes one output row.
    fn write_reshape_graph() -> PathBuf {
        let mut graph = Graph::new();
        let x = {
            let mut nd = graph.new_operation("Placeholder", "x").unwrap();
            nd.set_attr_type("dtype", DataType::Float).unwrap();
            nd.finish().unwrap()
        };
        let shape = {
            let mut nd = graph.new_operation("Const", "shape").unwrap();
            nd.set_attr_type("dtype", DataType::Int32).unwrap();
            let value = Tensor::<i32>::new(&[2]).with_values(&[-1, 3]).unwrap();
            nd.set_attr_tensor("value", value).unwrap();
            nd.finish().unwrap()
        };
        {
            let mut nd = graph.new_operation("Reshape", "Identity").unwrap();
            nd.add_input(Output {
                operation: x,
                index: 0,
            });
            nd.add_input(Output {
                operation: shape,
                index: 0,
            });
            nd.finish().unwrap();
        }

        let path = temp_path("graph.pb");
        fs::write(&path, graph.graph_def().unwrap()).unwrap();
        path
    }

    #[test]
    fn tensorflow_model_requires_named_operations() {
        let path = write_reshape_graph();

        let err = TensorflowModel::load(&path, "input_1", "Identity")
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::MissingOperation(ref name) if name == "input_1"));

        let err = TensorflowModel::load(&path, "x", "Softmax").err().unwrap();
        assert!(matches!(err, ModelError::MissingOperation(ref name) if name == "Softmax"));

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn tensorflow_model_returns_first_output_row() {
        let path = write_reshape_graph();
        let model = TensorflowModel::load(&path, "x", "Identity").unwrap();

        let input = ImageInput {
            width: 2,
            height: 2,
            data: (0..12).map(|v| v as f32).collect(),
        };
        assert_eq!(model.scores(&input).unwrap(), vec![0.0, 1.0, 2.0]);

        fs::remove_file(path).unwrap();
    }
}
