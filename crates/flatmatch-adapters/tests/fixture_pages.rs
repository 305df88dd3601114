use std::fs;
use std::path::{Path, PathBuf};

use flatmatch_adapters::{adapter_for_source, AdapterRegistry};
use flatmatch_core::Feature;

fn fixture(source: &str) -> (PathBuf, String) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join(source)
        .join("sample/search.html");
    let html = fs::read_to_string(&path).unwrap();
    (path, html)
}

#[test]
fn flatfox_sample_page_parses_priced_cards() {
    let (_, html) = fixture("flatfox");
    let adapter = adapter_for_source("flatfox", None).unwrap();
    let drafts = adapter
        .parse_search_page(&html, "https://flatfox.ch/fr/search/?q=Lausanne")
        .unwrap();

    // the "prix sur demande" card has no usable price
    assert_eq!(drafts.len(), 2);

    let first = drafts[0].clone().validate().unwrap();
    assert_eq!(first.source, "Flatfox");
    assert_eq!(first.title, "Bel appartement lumineux proche du centre");
    assert_eq!(first.price, 1850.0);
    assert_eq!(first.location, "Avenue de Cour 12, 1004 Lausanne");
    assert_eq!(first.rooms, Some(3.5));
    assert_eq!(first.size, Some(78.0));
    assert_eq!(
        first.features.iter().copied().collect::<Vec<_>>(),
        vec![Feature::Balcony, Feature::Elevator]
    );
    assert_eq!(first.link, "https://flatfox.ch/fr/flat/1004-lausanne/1180421/");
    assert_eq!(first.external_id, first.link);

    let studio = drafts[1].clone().validate().unwrap();
    assert_eq!(studio.rooms, Some(1.0));
    assert_eq!(studio.size, Some(28.0));
    assert!(studio.features.contains(&Feature::Furnished));
}

#[test]
fn immoscout_sample_page_parses_cards_with_addresses() {
    let (_, html) = fixture("immoscout");
    let adapter = adapter_for_source("immoscout", None).unwrap();
    let drafts = adapter
        .parse_search_page(&html, "https://www.immoscout24.ch/fr/immobilier/louer/lausanne")
        .unwrap();

    assert_eq!(drafts.len(), 2);
    assert!(drafts.iter().all(|d| d.source.as_deref() == Some("ImmoScout24")));

    let renens = drafts[0].clone().validate().unwrap();
    assert_eq!(renens.price, 1640.0);
    assert_eq!(renens.rooms, Some(2.5));
    assert_eq!(renens.size, Some(61.0));
    assert_eq!(
        renens.features.iter().copied().collect::<Vec<_>>(),
        vec![Feature::Parking, Feature::Garden]
    );

    let large = drafts[1].clone().validate().unwrap();
    assert_eq!(large.link, "https://www.immoscout24.ch/fr/d/appartement-louer-lausanne/8042290");
    assert_eq!(large.features.len(), 2);
    assert_eq!(large.rooms, Some(4.5));
}

#[test]
fn builtin_registry_has_a_fixture_per_source() {
    let registry = AdapterRegistry::builtin();
    assert_eq!(registry.len(), 2);
    for source in registry.source_ids() {
        let (path, _) = fixture(source);
        assert!(path.exists(), "missing fixture {}", path.display());
    }
}
