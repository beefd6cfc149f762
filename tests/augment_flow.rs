use coco_augment::config::{AugmentConfig, OutputMode, OutputPaths};
use coco_augment::core_modules::allocator::IdAllocator;
use coco_augment::core_modules::bbox::BBox;
use coco_augment::core_modules::dataset::Dataset;
use coco_augment::core_modules::operation::{OpKind, TransformOp};
use coco_augment::core_modules::policy::{Policy, PolicyCatalog, PolicyParams, PolicySelector};
use coco_augment::core_modules::transform::transform_pipeline;
use coco_augment::core_modules::utils::image_helper::image_helper;
use coco_augment::error::{AugmentError, IdSpace};
use coco_augment::pipeline::ImageDirectory;
use coco_augment::{AugmentationPipeline, DatasetWriter, ParallelPipeline, RunOutcome};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Fixture {
    _dir: tempfile::TempDir,
    annotations: PathBuf,
    images: PathBuf,
}

/// One 640x480 image (id 100) with one labeled object (id 5).
fn single_object_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let annotations_dir = dir.path().join("annotations");
    let images = dir.path().join("training");
    fs::create_dir_all(&annotations_dir).unwrap();
    fs::create_dir_all(&images).unwrap();

    let source = RgbImage::from_fn(640, 480, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    image_helper::save(&images.join("000100.jpg"), &source).unwrap();

    let annotations = annotations_dir.join("training.json");
    let raw = json!({
        "info": {"description": "road signs", "year": 2019},
        "licenses": [{"id": 1, "name": "CC"}],
        "images": [{"id": 100, "width": 640, "height": 480, "file_name": "000100.jpg"}],
        "annotations": [{"id": 5, "image_id": 100, "category_id": 3, "bbox": [10, 10, 50, 50], "area": 2500, "iscrowd": 0}],
        "categories": [{"id": 2, "name": "left"}, {"id": 3, "name": "stop"}]
    });
    fs::write(&annotations, serde_json::to_string_pretty(&raw).unwrap()).unwrap();

    Fixture {
        _dir: dir,
        annotations,
        images,
    }
}

fn config(seed: u64) -> AugmentConfig {
    AugmentConfig {
        repetitions: 3,
        image_id_base: 1258,
        annotation_id_base: 1258,
        seed: Some(seed),
        ..AugmentConfig::default()
    }
}

fn completed(outcome: RunOutcome) -> coco_augment::GeneratedSamples {
    match outcome {
        RunOutcome::Completed(generated) => generated,
        RunOutcome::Debug(_) => panic!("expected a completed run"),
    }
}

#[test]
fn single_annotation_end_to_end() {
    let fx = single_object_fixture();
    let cfg = config(2024);
    let source = Dataset::load(&fx.annotations).unwrap();
    cfg.validate().unwrap();
    cfg.validate_against(&source).unwrap();

    let paths = OutputPaths::resolve(OutputMode::Separate, &fx.annotations, &fx.images);
    let mut pipeline = AugmentationPipeline::from_config(&cfg, &fx.images);
    let generated = completed(pipeline.run(&source, cfg.repetitions).unwrap());
    assert!(generated.len() <= 3);
    assert_eq!(generated.stats.attempts, 3);

    let persisted = DatasetWriter::from_config(&cfg).write(&generated, &source, &paths).unwrap();
    assert_eq!(persisted.annotations_path, fx.annotations.with_file_name("training_new.json"));

    let merged = Dataset::load(&paths.annotations).unwrap();
    assert_eq!(merged.annotations.len(), 1 + generated.len());
    assert_eq!(merged.images.len(), 1 + generated.len());
    assert_eq!(merged.annotations[0], source.annotations[0]);
    assert_eq!(merged.images[0], source.images[0]);
    assert_eq!(merged.extra.get("licenses"), source.extra.get("licenses"));

    let annotations = merged.parse_annotations().unwrap();
    let images = merged.parse_images().unwrap();
    for (i, (ann, img)) in annotations[1..].iter().zip(&images[1..]).enumerate() {
        assert_eq!(ann.id, 1258 + i as u64);
        assert_eq!(ann.image_id, ann.id);
        assert_eq!(img.id, ann.image_id);
        assert_eq!(ann.category_id, 3);
        assert_eq!(img.file_name, format!("new{i}.jpg"));
        assert_eq!((img.width, img.height), (640, 480));
        assert!(paths.images.join(&img.file_name).exists());
    }

    for sample in &generated.samples {
        let (w, h) = sample.image.dimensions();
        assert!(sample.annotation.bbox.is_valid_within(w, h));
    }
}

#[test]
fn info_and_categories_survive_byte_for_byte() {
    let fx = single_object_fixture();
    let cfg = config(11);
    let source = Dataset::load(&fx.annotations).unwrap();
    let paths = OutputPaths::resolve(OutputMode::Separate, &fx.annotations, &fx.images);

    let generated = completed(AugmentationPipeline::from_config(&cfg, &fx.images).run(&source, 3).unwrap());
    DatasetWriter::from_config(&cfg).write(&generated, &source, &paths).unwrap();

    let merged = Dataset::load(&paths.annotations).unwrap();
    assert_eq!(
        serde_json::to_string(&merged.info).unwrap(),
        serde_json::to_string(&source.info).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&merged.categories).unwrap(),
        serde_json::to_string(&source.categories).unwrap()
    );
}

#[test]
fn in_place_mode_overwrites_the_source() {
    let fx = single_object_fixture();
    let cfg = AugmentConfig {
        output_mode: OutputMode::InPlace,
        ..config(5)
    };
    let source = Dataset::load(&fx.annotations).unwrap();
    let paths = OutputPaths::resolve(cfg.output_mode, &fx.annotations, &fx.images);
    assert_eq!(paths.annotations, fx.annotations);

    let generated = completed(AugmentationPipeline::from_config(&cfg, &fx.images).run(&source, 3).unwrap());
    DatasetWriter::from_config(&cfg).write(&generated, &source, &paths).unwrap();

    let reloaded = Dataset::load(&fx.annotations).unwrap();
    assert_eq!(reloaded.annotations.len(), 1 + generated.len());
    assert!(fx.images.join("000100.jpg").exists());
    for i in 0..generated.len() {
        assert!(fx.images.join(format!("new{i}.jpg")).exists());
    }
    assert!(!fx.annotations.with_file_name("training.json.tmp").exists());
}

#[test]
fn repeated_in_place_runs_never_share_an_image_file() {
    let fx = single_object_fixture();
    let paths = OutputPaths::resolve(OutputMode::InPlace, &fx.annotations, &fx.images);

    let mut total_generated = 0;
    for (round, base) in [(0u64, 1000u64), (1, 2000)] {
        let cfg = AugmentConfig {
            output_mode: OutputMode::InPlace,
            image_id_base: base,
            annotation_id_base: base,
            ..config(40 + round)
        };
        let source = Dataset::load(&fx.annotations).unwrap();
        cfg.validate_against(&source).unwrap();
        let generated = completed(AugmentationPipeline::from_config(&cfg, &fx.images).run(&source, 3).unwrap());
        total_generated += generated.len();
        DatasetWriter::from_config(&cfg).write(&generated, &source, &paths).unwrap();
    }

    let merged = Dataset::load(&fx.annotations).unwrap();
    let images = merged.parse_images().unwrap();
    assert_eq!(images.len(), 1 + total_generated);
    let mut names: Vec<_> = images.iter().map(|r| r.file_name.as_str()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), images.len(), "two records point at the same file");
    for record in &images {
        assert!(fx.images.join(&record.file_name).exists());
    }
}

#[test]
fn unreadable_source_dataset_aborts_before_any_output() {
    let fx = single_object_fixture();
    let separate = OutputPaths::resolve(OutputMode::Separate, &fx.annotations, &fx.images);

    let missing = fx.annotations.with_file_name("absent.json");
    assert!(matches!(Dataset::load(&missing), Err(AugmentError::Io { path, .. }) if path == missing));

    let broken = fx.annotations.with_file_name("broken.json");
    fs::write(&broken, "{\"info\": {}, \"images\": [").unwrap();
    assert!(matches!(Dataset::load(&broken), Err(AugmentError::Json { path, .. }) if path == broken));

    assert!(!separate.annotations.exists());
    assert!(!separate.images.exists());
    assert!(!fx.annotations.with_file_name("absent_new.json").exists());
    assert!(!fx.annotations.with_file_name("broken_new.json").exists());
}

#[test]
fn id_bases_below_existing_ids_are_refused() {
    let fx = single_object_fixture();
    let source = Dataset::load(&fx.annotations).unwrap();
    let cfg = AugmentConfig {
        annotation_id_base: 5,
        ..config(1)
    };
    match cfg.validate_against(&source) {
        Err(AugmentError::IdCollision {
            space, max_existing, ..
        }) => {
            assert_eq!(space, IdSpace::Annotation);
            assert_eq!(max_existing, 5);
        }
        other => panic!("expected an id collision, got {other:?}"),
    }
}

#[test]
fn no_flip_category_never_yields_a_mirror() {
    let params = PolicyParams {
        crop_width: 64,
        crop_height: 48,
        min_visibility: 0.9,
    };
    let catalog = PolicyCatalog::new([2, 11, 12], params);
    let image = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8 * 4, y as u8 * 5, 40]));
    let bbox = BBox::new(20.0, 14.0, 16.0, 16.0);
    let mut rng = StdRng::seed_from_u64(1000);

    for _ in 0..1000 {
        let policy = catalog.select(2, &mut rng);
        assert!(!policy.contains_mirror());
        if let Ok(sample) = transform_pipeline::apply(&image, bbox, 2, &policy, &mut rng) {
            assert!(!sample.applied.contains(&"HorizontalFlip"));
            assert!(!sample.applied.contains(&"VerticalFlip"));
            assert!(sample.visibility >= 0.9);
        }
    }
}

/// Moves the box completely off the canvas.
#[derive(Debug)]
struct CropElsewhere;

impl TransformOp for CropElsewhere {
    fn name(&self) -> &'static str {
        "CropElsewhere"
    }
    fn probability(&self) -> f64 {
        1.0
    }
    fn kind(&self) -> OpKind {
        OpKind::Geometric
    }
    fn apply(&self, image: &RgbImage, bbox: BBox, _rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        Some((image.clone(), bbox.translate(-(bbox.x_max() + 5.0), 0.0)))
    }
}

struct CropElsewhereSelector;

impl PolicySelector for CropElsewhereSelector {
    fn select(&self, _category_id: u32, _rng: &mut dyn RngCore) -> Policy {
        Policy::with_operations("CropElsewhere", vec![Box::new(CropElsewhere)], 0.9)
    }
}

#[test]
fn crop_outside_the_box_is_discarded() {
    let fx = single_object_fixture();
    let cfg = config(3);
    let source = Dataset::load(&fx.annotations).unwrap();
    let paths = OutputPaths::resolve(OutputMode::Separate, &fx.annotations, &fx.images);

    let mut pipeline = AugmentationPipeline::new(
        CropElsewhereSelector,
        ImageDirectory::from_config(&fx.images, &cfg),
        IdAllocator::new(cfg.annotation_id_base, cfg.image_id_base),
        StdRng::seed_from_u64(3),
    );
    let generated = completed(pipeline.run(&source, 10).unwrap());
    assert!(generated.is_empty());
    assert_eq!(generated.stats.rejected, 10);
    assert_eq!(pipeline.allocator().issued(), 0);

    DatasetWriter::from_config(&cfg).write(&generated, &source, &paths).unwrap();
    let merged = Dataset::load(&paths.annotations).unwrap();
    assert_eq!(merged.annotations, source.annotations);
    assert_eq!(merged.images, source.images);
}

#[test]
fn debug_mode_produces_no_dataset() {
    let fx = single_object_fixture();
    let cfg = config(8);
    let source = Dataset::load(&fx.annotations).unwrap();

    let mut pipeline = AugmentationPipeline::from_config(&cfg, &fx.images).with_debug(true);
    let RunOutcome::Debug(inspection) = pipeline.run(&source, 4).unwrap() else {
        panic!("expected a debug inspection");
    };
    assert_eq!(inspection.source.id, 5);
    assert_eq!(inspection.attempts, 4);
    assert_eq!(inspection.last.is_some(), inspection.accepted > 0);
    assert!(!fx.annotations.with_file_name("training_new.json").exists());
}

fn two_object_fixture(root: &Path) -> Dataset {
    for id in [1u64, 2] {
        let image = RgbImage::from_fn(160, 120, |x, y| Rgb([x as u8, y as u8, id as u8 * 60]));
        image_helper::save(&root.join(format!("{id:06}.jpg")), &image).unwrap();
    }
    serde_json::from_value(json!({
        "info": {},
        "images": [
            {"id": 1, "width": 160, "height": 120, "file_name": "000001.jpg"},
            {"id": 2, "width": 160, "height": 120, "file_name": "000002.jpg"}
        ],
        "annotations": [
            {"id": 1, "image_id": 1, "category_id": 2, "bbox": [30, 30, 40, 40]},
            {"id": 2, "image_id": 2, "category_id": 7, "bbox": [50, 20, 30, 50]}
        ],
        "categories": []
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_run_has_the_sequential_shape() {
    let dir = tempfile::tempdir().unwrap();
    let source = two_object_fixture(dir.path());
    let cfg = AugmentConfig {
        output_width: 160,
        output_height: 120,
        repetitions: 6,
        image_id_base: 10,
        annotation_id_base: 10,
        seed: Some(77),
        workers: Some(2),
        ..AugmentConfig::default()
    };

    let mut pipeline = ParallelPipeline::new(
        Arc::new(PolicyCatalog::new(cfg.no_flip_categories.iter().copied(), cfg.policy_params())),
        ImageDirectory::from_config(dir.path(), &cfg),
        IdAllocator::new(cfg.annotation_id_base, cfg.image_id_base),
        2,
        77,
    );
    let generated = pipeline.run(&source, cfg.repetitions).await.unwrap();
    assert_eq!(generated.stats.attempts, 12);
    assert!(generated.skipped.is_empty());

    let mut last_source = 0;
    for (i, sample) in generated.samples.iter().enumerate() {
        assert_eq!(sample.annotation.id, 10 + i as u64);
        assert_eq!(sample.annotation.image_id, 10 + i as u64);
        assert!(sample.source_annotation_id >= last_source);
        last_source = sample.source_annotation_id;
        let (w, h) = sample.image.dimensions();
        assert!(sample.annotation.bbox.is_valid_within(w, h));
    }

    let paths = OutputPaths {
        annotations: dir.path().join("out/merged.json"),
        images: dir.path().join("out/images"),
    };
    let persisted = DatasetWriter::from_config(&cfg).write(&generated, &source, &paths).unwrap();
    assert_eq!(persisted.dataset.annotations.len(), 2 + generated.len());
}

#[test]
fn config_loads_from_toml_with_defaults_for_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("augment.toml");
    fs::write(
        &path,
        "repetitions = 5\nno_flip_categories = [4]\noutput_mode = \"in_place\"\ndimension_mode = \"measured\"\n",
    )
    .unwrap();

    let cfg = AugmentConfig::from_toml_file(&path).unwrap();
    assert_eq!(cfg.repetitions, 5);
    assert_eq!(cfg.no_flip_categories, vec![4]);
    assert_eq!(cfg.output_mode, OutputMode::InPlace);
    assert_eq!(cfg.min_visibility, 0.9);
    assert_eq!(cfg.image_id_base, 1258);
    cfg.validate().unwrap();

    fs::write(&path, "repetitons = 5\n").unwrap();
    assert!(matches!(AugmentConfig::from_toml_file(&path), Err(AugmentError::Config(_))));
}
