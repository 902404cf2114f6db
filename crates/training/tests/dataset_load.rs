use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use training::{WlfwBatcher, WlfwDataset, INPUT_SIZE, LANDMARK_DIM};

type B = burn::backend::NdArray<f32>;

/// Write `count` red 112x112 face crops plus their WLFW list lines; returns
/// the list file path.
fn write_synthetic_list(dir: &Path, count: usize) -> PathBuf {
    let mut lines = String::new();
    for idx in 0..count {
        let name = format!("face_{idx:05}.png");
        let img = image::RgbImage::from_fn(INPUT_SIZE as u32, INPUT_SIZE as u32, |_x, _y| {
            image::Rgb([255, 0, 0])
        });
        img.save(dir.join(&name)).unwrap();

        let mut line = name;
        for i in 0..LANDMARK_DIM {
            write!(line, " {}", i as f32 / LANDMARK_DIM as f32).unwrap();
        }
        line.push_str(" 0 1 0 0 1 0");
        line.push_str(" -10.0 4.5 0.5");
        lines.push_str(&line);
        lines.push('\n');
    }
    let list = dir.join("list.txt");
    fs::write(&list, lines).unwrap();
    list
}

#[test]
fn load_and_batch_synthetic() {
    let temp = tempfile::tempdir().unwrap();
    let list = write_synthetic_list(temp.path(), 1);

    let dataset = WlfwDataset::from_list_file(&list).unwrap();
    assert_eq!(dataset.len(), 1);

    let item = Dataset::get(&dataset, 0).unwrap();
    assert_eq!(item.pixels.len(), 3 * INPUT_SIZE * INPUT_SIZE);

    let batch = WlfwBatcher::<B>::new(Default::default()).batch(vec![item]);
    assert_eq!(batch.images.dims(), [1, 3, INPUT_SIZE, INPUT_SIZE]);
    assert_eq!(batch.landmarks.dims(), [1, LANDMARK_DIM]);
    assert_eq!(batch.attributes.dims(), [1, 6]);
    assert_eq!(batch.euler_angles.dims(), [1, 3]);

    // Red image: R channel saturates to 1.0, G stays at 0.
    let pixels: Vec<f32> = batch.images.into_data().to_vec::<f32>().unwrap_or_default();
    assert!((pixels[0] - 1.0).abs() < 1e-6);
    assert!(pixels[INPUT_SIZE * INPUT_SIZE].abs() < 1e-6);

    let angles: Vec<f32> = batch
        .euler_angles
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default();
    assert_eq!(angles, vec![-10.0, 4.5, 0.5]);
}

#[test]
fn unreadable_image_is_dropped_without_truncating_the_epoch() {
    let temp = tempfile::tempdir().unwrap();
    let list = write_synthetic_list(temp.path(), 4);
    fs::remove_file(temp.path().join("face_00001.png")).unwrap();

    // The bad entry is dropped at load time, so the loader still sees every
    // readable sample, including those listed after it.
    let dataset = WlfwDataset::from_list_file(&list).unwrap();
    assert_eq!(dataset.len(), 3);

    let loader = DataLoaderBuilder::new(WlfwBatcher::<B>::new(Default::default()))
        .batch_size(1)
        .num_workers(1)
        .build(dataset);
    let seen: usize = loader.iter().map(|batch| batch.images.dims()[0]).sum();
    assert_eq!(seen, 3);
}

#[test]
fn image_vanishing_after_load_yields_none_from_get() {
    let temp = tempfile::tempdir().unwrap();
    let list = write_synthetic_list(temp.path(), 1);

    let dataset = WlfwDataset::from_list_file(&list).unwrap();
    assert_eq!(dataset.len(), 1);

    fs::remove_file(temp.path().join("face_00000.png")).unwrap();
    assert!(Dataset::get(&dataset, 0).is_none());
}

#[test]
fn malformed_list_line_fails_load() {
    let temp = tempfile::tempdir().unwrap();
    let list = temp.path().join("list.txt");
    fs::write(&list, "face.png 0.1 0.2 0.3\n").unwrap();
    assert!(WlfwDataset::from_list_file(&list).is_err());
}
