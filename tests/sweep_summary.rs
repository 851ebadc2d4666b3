//! Sweep orchestration: outputs, failure isolation and summary.json.

use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use tempfile::tempdir;

use stylestat::extract::{IdentityExtractor, INPUT_LAYER};
use stylestat::optim::SynthesisConfig;
use stylestat::stats::StatisticKind;
use stylestat::sweep::{run_sweep, RunStatus, SweepConfig, SweepSummary, SUMMARY_FILE};

fn gradient_image(w: u32, h: u32, tint: u8) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x * 15) as u8, (y * 15) as u8, tint]))
}

#[test]
fn test_sweep_records_failures_and_continues() {
    let dir = tempdir().unwrap();
    let images = dir.path().join("images");
    std::fs::create_dir_all(&images).unwrap();
    gradient_image(16, 16, 40).save(images.join("a.png")).unwrap();
    gradient_image(16, 16, 200).save(images.join("b.png")).unwrap();

    let cfg = SweepConfig {
        image_dir: images,
        output_dir: dir.path().join("out"),
        contents: vec!["a".into()],
        styles: vec!["b".into(), "missing".into()],
        kinds: vec![StatisticKind::Mean, StatisticKind::Gramian],
        shifts: BTreeMap::from([(StatisticKind::Gramian, vec![0.0, 100.0])]),
        image_size: 16,
        image_extension: "png".into(),
        synthesis: SynthesisConfig {
            style_layers: vec![INPUT_LAYER.into()],
            content_layers: vec![INPUT_LAYER.into()],
            style_weight: 1.0,
            content_weight: 1.0,
            max_iterations: 2,
            ..SynthesisConfig::default()
        },
        ..SweepConfig::default()
    };

    let summary = run_sweep(&IdentityExtractor, &cfg).unwrap();
    assert_eq!(summary.runs.len(), 6);
    assert_eq!(summary.succeeded(), 3);
    assert_eq!(summary.failed(), 3);

    for run in &summary.runs {
        match (&run.status, run.style.as_str()) {
            (RunStatus::Ok { output, iterations, final_loss }, "b") => {
                assert!(output.exists(), "{}", output.display());
                assert!(*iterations >= 1);
                assert!(final_loss.is_some());
            }
            (RunStatus::Failed { reason }, "missing") => {
                assert!(reason.contains("missing.png"), "{reason}");
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
    assert!(cfg.output_dir.join("a_b_gramian_100.0.png").exists());
    assert!(cfg.output_dir.join("a_b_mean_0.0.png").exists());

    let text = std::fs::read_to_string(cfg.output_dir.join(SUMMARY_FILE)).unwrap();
    let on_disk: SweepSummary = serde_json::from_str(&text).unwrap();
    assert_eq!(on_disk.runs.len(), summary.runs.len());
    for (a, b) in on_disk.runs.iter().zip(&summary.runs) {
        assert_eq!((&a.content, &a.style, a.kind, a.shift), (&b.content, &b.style, b.kind, b.shift));
        assert_eq!(
            matches!(a.status, RunStatus::Ok { .. }),
            matches!(b.status, RunStatus::Ok { .. })
        );
    }
    assert!(text.contains(r#""status": "failed""#));
}

#[test]
fn test_parallel_sweep_matches_sequential_plan() {
    let dir = tempdir().unwrap();
    gradient_image(8, 8, 0).save(dir.path().join("c.png")).unwrap();
    gradient_image(8, 8, 255).save(dir.path().join("s.png")).unwrap();

    let base = SweepConfig {
        image_dir: dir.path().to_path_buf(),
        contents: vec!["c".into()],
        styles: vec!["s".into()],
        kinds: vec![StatisticKind::Variance, StatisticKind::Covariance],
        image_size: 8,
        image_extension: "png".into(),
        synthesis: SynthesisConfig {
            style_layers: vec![INPUT_LAYER.into()],
            content_layers: vec![],
            max_iterations: 1,
            ..SynthesisConfig::default()
        },
        ..SweepConfig::default()
    };
    let seq = run_sweep(
        &IdentityExtractor,
        &SweepConfig {
            output_dir: dir.path().join("seq"),
            ..base.clone()
        },
    )
    .unwrap();
    let par = run_sweep(
        &IdentityExtractor,
        &SweepConfig {
            output_dir: dir.path().join("par"),
            parallel: true,
            ..base
        },
    )
    .unwrap();

    assert_eq!(seq.succeeded(), 2);
    assert_eq!(par.succeeded(), 2);
    let kinds = |s: &SweepSummary| s.runs.iter().map(|r| r.kind).collect::<Vec<_>>();
    assert_eq!(kinds(&seq), kinds(&par));
}

#[test]
fn test_numerical_failure_does_not_stop_the_sweep() {
    let dir = tempdir().unwrap();
    gradient_image(8, 8, 30).save(dir.path().join("c.png")).unwrap();
    gradient_image(8, 8, 220).save(dir.path().join("s.png")).unwrap();

    // (x + 1e20)² overflows f32, so the first configuration goes non-finite.
    let cfg = SweepConfig {
        image_dir: dir.path().to_path_buf(),
        output_dir: dir.path().join("out"),
        contents: vec!["c".into()],
        styles: vec!["s".into()],
        kinds: vec![StatisticKind::Gramian],
        shifts: BTreeMap::from([(StatisticKind::Gramian, vec![1e20, 0.0])]),
        image_size: 8,
        image_extension: "png".into(),
        synthesis: SynthesisConfig {
            style_layers: vec![INPUT_LAYER.into()],
            content_layers: vec![INPUT_LAYER.into()],
            style_weight: 1.0,
            content_weight: 1.0,
            max_iterations: 2,
            ..SynthesisConfig::default()
        },
        ..SweepConfig::default()
    };

    let summary = run_sweep(&IdentityExtractor, &cfg).unwrap();
    assert_eq!(summary.runs.len(), 2);

    let overflow = &summary.runs[0];
    assert_eq!(overflow.kind, StatisticKind::Gramian);
    assert_eq!(overflow.shift, 1e20);
    match &overflow.status {
        RunStatus::Failed { reason } => {
            assert!(reason.contains("non-finite"), "{reason}");
            assert!(reason.contains("kind=gramian"), "{reason}");
            assert!(reason.contains("shift=100000000000000000000"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let next = &summary.runs[1];
    assert_eq!(next.shift, 0.0);
    assert!(matches!(next.status, RunStatus::Ok { .. }), "{:?}", next.status);
    assert!(cfg.output_dir.join("c_s_gramian_0.0.png").exists());
}
