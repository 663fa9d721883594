//! End-to-end preparation of ADI and IFS datasets through an in-memory loader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use common::Buffer2;
use hcikit::{
    ArrayLoader, CollapseMode, DatasetConfig, DatasetPaths, HciDataset, HciError,
    InstrumentPresets, NdArray, PsfNormalization, PsfNormalizeConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct MemoryLoader {
    arrays: HashMap<PathBuf, NdArray>,
}

impl MemoryLoader {
    fn insert(&mut self, path: &str, array: NdArray) {
        self.arrays.insert(PathBuf::from(path), array);
    }
}

impl ArrayLoader for MemoryLoader {
    fn load_array(&self, path: &Path) -> anyhow::Result<NdArray> {
        self.arrays
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("{} not found", path.display()))
    }
}

fn gaussian(size: usize, cx: f64, cy: f64, sigma: f64, amplitude: f64) -> Buffer2<f32> {
    Buffer2::from_fn(size, size, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        (amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()) as f32
    })
}

/// Star at the frame centre on a noisy background, `count` frames.
fn noisy_frames(rng: &mut StdRng, count: usize, size: usize) -> Vec<f32> {
    let c = (size / 2) as f64;
    let star = gaussian(size, c, c, 3.0, 500.0);
    let mut data = Vec::with_capacity(count * size * size);
    for _ in 0..count {
        data.extend(star.iter().map(|&v| v + rng.random_range(0.0f32..10.0)));
    }
    data
}

fn naco_like_loader() -> MemoryLoader {
    let mut rng = StdRng::seed_from_u64(42);
    let mut loader = MemoryLoader::default();
    loader.insert(
        "naco_cube.fits",
        NdArray::new(vec![61, 200, 200], noisy_frames(&mut rng, 61, 200)).unwrap(),
    );
    let angles: Vec<f32> = (0..61).map(|i| -30.0 + i as f32).collect();
    loader.insert("naco_angles.fits", NdArray::new(vec![61, 1], angles).unwrap());
    loader.insert(
        "naco_psf.fits",
        NdArray::from(gaussian(21, 10.3, 9.8, 2.0, 1200.0)),
    );
    loader
}

fn naco_paths() -> DatasetPaths {
    DatasetPaths {
        cube: PathBuf::from("naco_cube.fits"),
        angles: PathBuf::from("naco_angles.fits"),
        psf: PathBuf::from("naco_psf.fits"),
        wavelengths: None,
    }
}

#[test]
fn adi_crop_then_normalize() {
    init_tracing();
    let scale = InstrumentPresets::builtin().pixel_scale("VLT_NACO").unwrap();
    let mut ds =
        HciDataset::load(&naco_like_loader(), &naco_paths(), scale, DatasetConfig::default())
            .unwrap();
    assert_eq!(ds.cube().shape(), vec![61, 200, 200]);
    assert_eq!(ds.angles().len(), 61);
    assert_eq!(ds.psf().stamps()[0].dim(), (21, 21));

    ds.crop_frames(100, false).unwrap();
    assert_eq!(ds.cube().shape(), vec![61, 100, 100]);
    assert_eq!(ds.angles().len(), ds.geometry().frames);

    let raw_psf = ds.psf().clone();
    let normalized = ds.normalize_psf(Some(20), false).unwrap();
    let stamp = normalized.stamp();
    assert_eq!(stamp.dim(), (20, 20));
    let (peak, px, py) = stamp.max_with_position().unwrap();
    assert!((peak - 1.0).abs() < 1e-5);
    assert_eq!((px, py), (10, 10));
    assert_eq!(ds.psf(), &raw_psf);

    let fwhm = ds.fwhm().unwrap();
    assert!((fwhm[0] - 2.0 * 2.354_82).abs() < 0.05);
}

#[test]
fn adi_star_stays_centred_after_crop() {
    let mut ds =
        HciDataset::load(&naco_like_loader(), &naco_paths(), 0.02719, DatasetConfig::default())
            .unwrap();
    ds.crop_frames(51, true).unwrap();
    let collapsed = ds.collapse(CollapseMode::Median);
    assert_eq!(collapsed.len(), 1);
    let (_, px, py) = collapsed[0].max_with_position().unwrap();
    // star at (100, 100), window starts at 100 - 51 / 2
    assert_eq!((px, py), (25, 25));
}

#[test]
fn crop_is_idempotent() {
    let mut ds =
        HciDataset::load(&naco_like_loader(), &naco_paths(), 0.02719, DatasetConfig::default())
            .unwrap();
    ds.crop_frames(100, false).unwrap();
    let once = ds.cube().clone();
    ds.crop_frames(100, false).unwrap();
    assert_eq!(ds.cube(), &once);
}

#[test]
fn even_size_with_force_odd_leaves_state() {
    let mut ds =
        HciDataset::load(&naco_like_loader(), &naco_paths(), 0.02719, DatasetConfig::default())
            .unwrap();
    let err = ds.normalize_psf(Some(20), true).unwrap_err();
    assert!(matches!(err, HciError::Config(_)));
    assert!(ds.normalized_psf().is_none());

    ds.normalize_psf(Some(21), true).unwrap();
    let kept = ds.normalized_psf().cloned();
    assert!(ds.normalize_psf(Some(20), true).is_err());
    assert_eq!(ds.normalized_psf().cloned(), kept);
}

#[test]
fn all_zero_psf_fails_fit() {
    let mut ds = HciDataset::construct(
        NdArray::new(vec![3, 32, 32], vec![1.0; 3 * 32 * 32]).unwrap(),
        vec![0.0, 1.0, 2.0],
        NdArray::new(vec![21, 21], vec![0.0; 441]).unwrap(),
        0.01,
        None,
    )
    .unwrap();
    assert!(matches!(
        ds.normalize_psf(None, true),
        Err(HciError::Fit(_))
    ));
    assert!(ds.normalized_psf().is_none());
}

#[test]
fn dimension_errors_for_wavelengths() {
    let four_d = NdArray::new(vec![2, 3, 16, 16], vec![0.0; 2 * 3 * 256]).unwrap();
    let psf = NdArray::from(gaussian(9, 4.0, 4.0, 1.5, 1.0));
    assert!(matches!(
        HciDataset::construct(four_d, vec![0.0; 3], psf.clone(), 0.01, None),
        Err(HciError::DimensionMismatch { .. })
    ));

    let three_d = NdArray::new(vec![3, 16, 16], vec![0.0; 3 * 256]).unwrap();
    assert!(matches!(
        HciDataset::construct(three_d, vec![0.0; 3], psf, 0.01, Some(vec![1.6, 2.2])),
        Err(HciError::DimensionMismatch { .. })
    ));
}

#[test]
fn ifs_crop_and_per_channel_psf() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(3);
    let mut loader = MemoryLoader::default();
    loader.insert(
        "ifs_cube.fits",
        NdArray::new(vec![4, 50, 100, 100], noisy_frames(&mut rng, 4 * 50, 100)).unwrap(),
    );
    loader.insert(
        "ifs_angles.fits",
        NdArray::from_vec((0..50).map(|i| i as f32 * 0.8).collect()),
    );
    loader.insert(
        "ifs_lambda.fits",
        NdArray::from_vec(vec![0.96, 1.1, 1.25, 1.4]),
    );
    let psf: Vec<f32> = (0..4)
        .flat_map(|c| gaussian(31, 15.0, 15.0, 1.5 + 0.3 * c as f64, 100.0).into_vec())
        .collect();
    loader.insert("ifs_psf.fits", NdArray::new(vec![4, 31, 31], psf).unwrap());

    let paths = DatasetPaths {
        cube: PathBuf::from("ifs_cube.fits"),
        angles: PathBuf::from("ifs_angles.fits"),
        psf: PathBuf::from("ifs_psf.fits"),
        wavelengths: Some(PathBuf::from("ifs_lambda.fits")),
    };
    let scale = InstrumentPresets::builtin()
        .pixel_scale("VLT_SPHERE_IFS")
        .unwrap();
    let mut ds = HciDataset::load(&loader, &paths, scale, DatasetConfig::default()).unwrap();
    assert!(ds.is_ifs());
    assert_eq!(ds.wavelengths().unwrap().len(), 4);

    ds.crop_frames(80, false).unwrap();
    assert_eq!(ds.cube().shape(), vec![4, 50, 80, 80]);
    assert_eq!(ds.angles().len(), 50);
    assert_eq!(ds.wavelengths().unwrap().len(), 4);

    let config = PsfNormalizeConfig {
        normalization: PsfNormalization::ApertureFlux { fwhm_factor: 1.0 },
        ..PsfNormalizeConfig::default().with_size(Some(21), true)
    };
    let normalized = ds.normalize_psf_with(&config).unwrap();
    assert!(normalized.is_per_channel());
    let fwhm = normalized.fwhm();
    assert_eq!(fwhm.len(), 4);
    assert!(fwhm.windows(2).all(|w| w[1] > w[0]));

    ds.keep_frames(10, 39).unwrap();
    assert_eq!(ds.cube().shape(), vec![4, 30, 80, 80]);
    assert_eq!(ds.angles().len(), 30);
    assert!((ds.angles()[0] - 8.0).abs() < 1e-5);
    assert_eq!(ds.collapse(CollapseMode::Mean).len(), 4);
}

#[test]
fn presets_from_yaml_feed_the_dataset() {
    let presets = InstrumentPresets::from_yaml_str(
        "presets:\n  - name: VLT_SPHERE_IRDIS\n    pixel_scale: 0.01225\n",
    )
    .unwrap();
    let ds = HciDataset::construct(
        NdArray::new(vec![2, 16, 16], vec![0.0; 512]).unwrap(),
        vec![0.0, 1.0],
        NdArray::from(gaussian(9, 4.0, 4.0, 1.5, 1.0)),
        presets.pixel_scale("vlt_sphere_irdis").unwrap(),
        None,
    )
    .unwrap();
    assert_eq!(ds.pixel_scale(), 0.01225);
}
