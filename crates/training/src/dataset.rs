use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Facial keypoints per sample in the WLFW annotation format.
pub const NUM_LANDMARKS: usize = 98;
/// Flattened landmark vector length (x/y per keypoint).
pub const LANDMARK_DIM: usize = 2 * NUM_LANDMARKS;
/// Binary face attributes per sample (pose, expression, illumination,
/// make-up, occlusion, blur).
pub const NUM_ATTRIBUTES: usize = 6;
/// Euler angles per sample (yaw, pitch, roll).
pub const NUM_EULER_ANGLES: usize = 3;
/// Expected side length of the pre-cropped face images.
pub const INPUT_SIZE: usize = 112;

const FIELDS_PER_LINE: usize = 1 + LANDMARK_DIM + NUM_ATTRIBUTES + NUM_EULER_ANGLES;

/// One parsed line of a WLFW list file: the image path followed by the
/// normalized landmark coordinates, the attribute flags and the Euler angles.
#[derive(Debug, Clone)]
pub struct WlfwRecord {
    pub image: PathBuf,
    pub landmarks: Vec<f32>,
    pub attributes: Vec<f32>,
    pub euler_angles: Vec<f32>,
}

fn parse_floats(fields: &[&str]) -> anyhow::Result<Vec<f32>> {
    fields
        .iter()
        .map(|s| {
            s.parse::<f32>()
                .map_err(|e| anyhow::anyhow!("invalid number {s:?}: {e}"))
        })
        .collect()
}

/// Parse one list line. Relative image paths resolve against `base`, the
/// directory containing the list file.
pub fn parse_list_line(line: &str, base: &Path) -> anyhow::Result<WlfwRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELDS_PER_LINE {
        anyhow::bail!(
            "expected {FIELDS_PER_LINE} whitespace fields per list line, got {}",
            fields.len()
        );
    }
    let path = Path::new(fields[0]);
    let image = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let landmarks = parse_floats(&fields[1..1 + LANDMARK_DIM])?;
    let attributes = parse_floats(&fields[1 + LANDMARK_DIM..1 + LANDMARK_DIM + NUM_ATTRIBUTES])?;
    let euler_angles = parse_floats(&fields[1 + LANDMARK_DIM + NUM_ATTRIBUTES..])?;
    Ok(WlfwRecord {
        image,
        landmarks,
        attributes,
        euler_angles,
    })
}

/// WLFW-format dataset backed by a list file. Labels are parsed eagerly and
/// every image header is checked up front, so an unreadable entry is dropped
/// here rather than surfacing mid-epoch. Full image decoding happens lazily
/// in [`Dataset::get`] so the dataloader workers own the decode cost.
#[derive(Debug)]
pub struct WlfwDataset {
    records: Vec<WlfwRecord>,
}

impl WlfwDataset {
    pub fn from_list_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read list file {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut records = Vec::new();
        let mut dropped = 0usize;
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_list_line(line, base)
                .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
            // Header-only read; the full decode stays in the workers.
            match image::image_dimensions(&record.image) {
                Ok((w, h)) if w as usize == INPUT_SIZE && h as usize == INPUT_SIZE => {
                    records.push(record);
                }
                Ok((w, h)) => {
                    tracing::error!(
                        "dropping {:?} ({}:{}): expected {INPUT_SIZE}x{INPUT_SIZE} face crop, got {w}x{h}",
                        record.image,
                        path.display(),
                        lineno + 1
                    );
                    dropped += 1;
                }
                Err(err) => {
                    tracing::error!(
                        "dropping unreadable sample {:?} ({}:{}): {err}",
                        record.image,
                        path.display(),
                        lineno + 1
                    );
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, kept = records.len(), "list contained unusable samples");
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[WlfwRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A decoded sample: normalized CHW pixels plus the label vectors.
#[derive(Debug, Clone)]
pub struct WlfwItem {
    pub pixels: Vec<f32>,
    pub landmarks: Vec<f32>,
    pub attributes: Vec<f32>,
    pub euler_angles: Vec<f32>,
}

fn decode(record: &WlfwRecord) -> anyhow::Result<WlfwItem> {
    let img = image::open(&record.image)
        .map_err(|e| anyhow::anyhow!("failed to open image {:?}: {e}", record.image))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    if width as usize != INPUT_SIZE || height as usize != INPUT_SIZE {
        anyhow::bail!(
            "expected {INPUT_SIZE}x{INPUT_SIZE} face crop, got {width}x{height} for {:?}",
            record.image
        );
    }

    // Normalized pixel data in CHW order.
    let mut pixels = Vec::with_capacity(3 * INPUT_SIZE * INPUT_SIZE);
    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let p = img.get_pixel(x, y);
                pixels.push(p[c] as f32 / 255.0);
            }
        }
    }

    Ok(WlfwItem {
        pixels,
        landmarks: record.landmarks.clone(),
        attributes: record.attributes.clone(),
        euler_angles: record.euler_angles.clone(),
    })
}

impl Dataset<WlfwItem> for WlfwDataset {
    fn get(&self, index: usize) -> Option<WlfwItem> {
        let record = self.records.get(index)?;
        match decode(record) {
            Ok(item) => Some(item),
            Err(err) => {
                // Readability was checked at load time, so this only fires
                // if the file changed underneath us. The loader stops the
                // epoch at the first `None`.
                tracing::error!("sample {:?} became unreadable: {err:#}", record.image);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// One collated batch of face crops and their ground truth.
#[derive(Debug, Clone)]
pub struct WlfwBatch<B: Backend> {
    /// Shape `[batch, 3, 112, 112]`.
    pub images: Tensor<B, 4>,
    /// Shape `[batch, 196]`, normalized coordinates.
    pub landmarks: Tensor<B, 2>,
    /// Shape `[batch, 6]`, zero/one flags.
    pub attributes: Tensor<B, 2>,
    /// Shape `[batch, 3]`.
    pub euler_angles: Tensor<B, 2>,
}

#[derive(Debug, Clone)]
pub struct WlfwBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> WlfwBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<WlfwItem, WlfwBatch<B>> for WlfwBatcher<B> {
    fn batch(&self, items: Vec<WlfwItem>) -> WlfwBatch<B> {
        let batch = items.len();
        let mut image_buf = Vec::with_capacity(batch * 3 * INPUT_SIZE * INPUT_SIZE);
        let mut landmark_buf = Vec::with_capacity(batch * LANDMARK_DIM);
        let mut attribute_buf = Vec::with_capacity(batch * NUM_ATTRIBUTES);
        let mut angle_buf = Vec::with_capacity(batch * NUM_EULER_ANGLES);
        for item in &items {
            image_buf.extend_from_slice(&item.pixels);
            landmark_buf.extend_from_slice(&item.landmarks);
            attribute_buf.extend_from_slice(&item.attributes);
            angle_buf.extend_from_slice(&item.euler_angles);
        }

        let images = Tensor::from_data(
            TensorData::new(image_buf, [batch, 3, INPUT_SIZE, INPUT_SIZE]),
            &self.device,
        );
        let landmarks = Tensor::from_data(
            TensorData::new(landmark_buf, [batch, LANDMARK_DIM]),
            &self.device,
        );
        let attributes = Tensor::from_data(
            TensorData::new(attribute_buf, [batch, NUM_ATTRIBUTES]),
            &self.device,
        );
        let euler_angles = Tensor::from_data(
            TensorData::new(angle_buf, [batch, NUM_EULER_ANGLES]),
            &self.device,
        );

        WlfwBatch {
            images,
            landmarks,
            attributes,
            euler_angles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_resolves_relative_paths() {
        let mut line = String::from("faces/face_0.png");
        for i in 0..LANDMARK_DIM {
            line.push_str(&format!(" {}", i as f32 / LANDMARK_DIM as f32));
        }
        line.push_str(" 0 1 0 1 0 1");
        line.push_str(" -4.5 2.0 0.25");

        let record = parse_list_line(&line, Path::new("/data/train")).unwrap();
        assert_eq!(record.image, Path::new("/data/train/faces/face_0.png"));
        assert_eq!(record.landmarks.len(), LANDMARK_DIM);
        assert_eq!(record.attributes, vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        assert_eq!(record.euler_angles, vec![-4.5, 2.0, 0.25]);
    }

    #[test]
    fn parse_line_rejects_wrong_field_count() {
        assert!(parse_list_line("face.png 0.1 0.2", Path::new(".")).is_err());
    }

    #[test]
    fn parse_line_rejects_non_numeric_labels() {
        let mut line = String::from("face.png");
        for _ in 0..(FIELDS_PER_LINE - 2) {
            line.push_str(" 0.5");
        }
        line.push_str(" not_a_number");
        assert!(parse_list_line(&line, Path::new(".")).is_err());
    }
}
