use tempfile::TempDir;

use depot::models::PackageType;
use depot::package::{self, ArchiveError};

use crate::common::{PLUGIN_MAIN, THEME_STYLE, test_cache, write_zip};

#[test]
fn plugin_archive_yields_plugin_metadata() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let archive = dir.path().join("acme-plugin.zip");

    write_zip(&archive, &[("acme-plugin/acme-plugin.php", PLUGIN_MAIN)]);

    let pkg = package::load_package(&cache, "acme-plugin", &archive)
        .unwrap()
        .unwrap();

    assert_eq!(pkg.metadata.package_type, PackageType::Plugin);
    assert_eq!(pkg.metadata.name, "Acme Plugin");
    assert_eq!(pkg.metadata.version, "1.2.3");
    assert_eq!(pkg.metadata.slug, "acme-plugin");
    assert_eq!(pkg.metadata.homepage.as_deref(), Some("https://acme.example"));
    assert!(pkg.metadata.require_license);
}

#[test]
fn theme_stylesheet_wins_over_scripts() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let archive = dir.path().join("acme-theme.zip");

    write_zip(
        &archive,
        &[
            ("acme-theme/style.css", THEME_STYLE),
            ("acme-theme/functions.php", "<?php\n/* Plugin Name: Decoy */\n"),
        ],
    );

    let pkg = package::load_package(&cache, "acme-theme", &archive)
        .unwrap()
        .unwrap();

    assert_eq!(pkg.metadata.package_type, PackageType::Theme);
    assert_eq!(pkg.metadata.name, "Acme Theme");
    // Themes default their details page to the homepage.
    assert_eq!(
        pkg.metadata.details_url.as_deref(),
        Some("https://acme.example/theme")
    );
}

#[test]
fn generic_manifest_is_recognized() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let archive = dir.path().join("acme-tool.zip");

    let manifest = r#"{
        "packageData": {
            "Name": "Acme Tool",
            "Version": "0.9.1",
            "Homepage": "https://acme.example/tool",
            "Description": "A generic package."
        }
    }"#;
    write_zip(&archive, &[("acme-tool/depot.json", manifest)]);

    let pkg = package::load_package(&cache, "acme-tool", &archive)
        .unwrap()
        .unwrap();

    assert_eq!(pkg.metadata.package_type, PackageType::Generic);
    assert_eq!(pkg.metadata.name, "Acme Tool");
    assert_eq!(pkg.metadata.version, "0.9.1");
}

#[test]
fn readme_fields_are_merged() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let archive = dir.path().join("acme-plugin.zip");

    let readme = "=== Acme Plugin ===\nRequires at least: 6.0\nTested up to: 6.4\n\n\
                  Intro.\n\n== Description ==\nLong text.\n\n== Upgrade Notice ==\n\
                  = 1.2.3 =\nUpgrade now.\n";

    write_zip(
        &archive,
        &[
            ("acme-plugin/acme-plugin.php", PLUGIN_MAIN),
            ("acme-plugin/readme.txt", readme),
        ],
    );

    let pkg = package::load_package(&cache, "acme-plugin", &archive)
        .unwrap()
        .unwrap();

    assert_eq!(pkg.metadata.requires.as_deref(), Some("6.0"));
    assert_eq!(pkg.metadata.tested.as_deref(), Some("6.4"));
    assert_eq!(pkg.metadata.upgrade_notice.as_deref(), Some("Upgrade now."));

    let sections = pkg.metadata.sections.as_ref().unwrap();
    assert_eq!(sections["description"], "Long text.");
}

#[test]
fn unrecognizable_archive_is_invalid_not_missing() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let archive = dir.path().join("junk.zip");

    write_zip(&archive, &[("junk/notes.txt", "nothing useful")]);

    let outcome = package::load_package(&cache, "junk", &archive).unwrap();
    assert!(matches!(outcome, Err(ArchiveError::Invalid(_))));
}

#[test]
fn deeply_nested_entries_are_ignored() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let archive = dir.path().join("nested.zip");

    // The only plugin file sits two directories deep, out of scan range.
    write_zip(&archive, &[("nested/deep/plugin.php", PLUGIN_MAIN)]);

    let outcome = package::load_package(&cache, "nested", &archive).unwrap();
    assert!(matches!(outcome, Err(ArchiveError::Invalid(_))));
}

#[test]
fn replacing_the_archive_invalidates_cached_metadata() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(dir.path());
    let archive = dir.path().join("acme-plugin.zip");

    write_zip(&archive, &[("acme-plugin/acme-plugin.php", PLUGIN_MAIN)]);
    let first = package::load_package(&cache, "acme-plugin", &archive)
        .unwrap()
        .unwrap();
    assert_eq!(first.metadata.version, "1.2.3");

    // New content changes the (path, size, mtime) fingerprint, so the
    // cached entry no longer applies.
    let updated = PLUGIN_MAIN.replace("1.2.3", "2.0.0-with-longer-version");
    write_zip(&archive, &[("acme-plugin/acme-plugin.php", &updated)]);

    let second = package::load_package(&cache, "acme-plugin", &archive)
        .unwrap()
        .unwrap();
    assert_eq!(second.metadata.version, "2.0.0-with-longer-version");
}
