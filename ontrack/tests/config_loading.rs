use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use ontrack::config::{CONFIG_ENV, FONT_ENV};
use ontrack::{TrackerConfig, TrackingError};
use tempfile::NamedTempFile;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [CONFIG_ENV, FONT_ENV] {
        // SAFETY: every test touching the environment holds ENV_LOCK.
        unsafe { std::env::remove_var(key) };
    }
}

fn config_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(text.as_bytes()).expect("write config");
    file
}

#[test]
fn no_file_means_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrackerConfig::load(None).expect("load config");
    assert_eq!(cfg, TrackerConfig::default());
    assert_eq!(cfg.knn.history, 500);
    assert_eq!(cfg.denoise.close_kernel, 30);
    assert!(cfg.output.write_video);
}

#[test]
fn explicit_file_is_loaded() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        r#"
        [knn]
        history = 250
        detect_shadows = false

        [denoise]
        close_kernel = 15
        median_kernel = 3

        [output]
        write_video = false
        font_path = "/usr/share/fonts/overlay.ttf"
        "#,
    );
    let cfg = TrackerConfig::load(Some(file.path())).expect("load config");
    assert_eq!(cfg.knn.history, 250);
    assert!(!cfg.knn.detect_shadows);
    assert_eq!(cfg.knn.knn, 2);
    assert_eq!(cfg.denoise.close_kernel, 15);
    assert_eq!(cfg.denoise.median_kernel, 3);
    assert_eq!(cfg.denoise.threshold, 127);
    assert!(!cfg.output.write_video);
    assert_eq!(
        cfg.output.font_path,
        Some(PathBuf::from("/usr/share/fonts/overlay.ttf"))
    );
}

#[test]
fn environment_names_the_file_and_the_font() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file("[knn]\nsamples_per_pixel = 9\nknn = 3\n");
    // SAFETY: guarded by ENV_LOCK.
    unsafe {
        std::env::set_var(CONFIG_ENV, file.path());
        std::env::set_var(FONT_ENV, "/tmp/overlay.otf");
    }

    let cfg = TrackerConfig::load(None).expect("load config");
    assert_eq!(cfg.knn.samples_per_pixel, 9);
    assert_eq!(cfg.knn.knn, 3);
    assert_eq!(cfg.output.font_path, Some(PathBuf::from("/tmp/overlay.otf")));

    clear_env();
}

#[test]
fn explicit_file_wins_over_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let from_env = config_file("[knn]\nhistory = 100\n");
    let explicit = config_file("[knn]\nhistory = 900\n");
    // SAFETY: guarded by ENV_LOCK.
    unsafe { std::env::set_var(CONFIG_ENV, from_env.path()) };

    let cfg = TrackerConfig::load(Some(explicit.path())).expect("load config");
    assert_eq!(cfg.knn.history, 900);

    clear_env();
}

#[test]
fn missing_or_invalid_file_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let missing = TrackerConfig::load(Some(dir.path().join("absent.toml").as_path()));
    assert!(matches!(missing, Err(TrackingError::Config(_))));

    let zero = config_file("[knn]\nsamples_per_pixel = 0\n");
    assert!(matches!(
        TrackerConfig::load(Some(zero.path())),
        Err(TrackingError::Config(_))
    ));

    let oversized = config_file("[denoise]\nclose_kernel = 1000\n");
    assert!(matches!(
        TrackerConfig::load(Some(oversized.path())),
        Err(TrackingError::Config(_))
    ));
}
