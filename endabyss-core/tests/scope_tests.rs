//! Canonicalisation round-trip and scope-membership properties.

use endabyss_core::config::{ScopeMode, default_tracking_denylist};
use endabyss_core::scope::{ScopeFilter, Target, canonicalize, dedup_key};
use url::Url;

fn canon(raw: &str) -> Url {
    canonicalize(raw, &default_tracking_denylist()).unwrap()
}

#[test]
fn test_normalising_canonical_url_is_identity() {
    let inputs = [
        "http://example.com/",
        "https://example.com/a/b?x=1&y=2",
        "http://example.com:8080/app/",
        "http://example.com/a%2Fb",
        "http://example.com/p?q=a%20b",
    ];
    for raw in inputs {
        let once = canon(raw);
        let twice = canon(once.as_str());
        assert_eq!(once, twice, "double-canonicalisation changed {}", raw);
        assert_eq!(dedup_key(&once), dedup_key(&twice));
    }
}

#[test]
fn test_equivalent_spellings_share_a_dedup_key() {
    let spellings = [
        "HTTP://Example.COM:80/a/../b?z=1&a=2#frag",
        "http://example.com/b?a=2&z=1",
        "http://example.com/x/../b?z=1&a=2",
    ];
    let keys: Vec<String> = spellings.iter().map(|s| dedup_key(&canon(s))).collect();
    assert!(keys.windows(2).all(|w| w[0] == w[1]), "keys diverged: {:?}", keys);
}

#[test]
fn test_tracking_denylist_wildcards() {
    let url = canon("http://h/p?utm_source=a&utm_campaign=b&gclid=x&keep=1");
    assert_eq!(url.as_str(), "http://h/p?keep=1");
}

#[test]
fn test_custom_denylist() {
    let url = canonicalize("http://h/p?sid=1&q=2", &["sid".to_string()]).unwrap();
    assert_eq!(url.as_str(), "http://h/p?q=2");
}

#[test]
fn test_scope_modes_disagree_on_subdomains() {
    let seed = Url::parse("http://app.example.com/portal/").unwrap();
    let other_sub = Url::parse("http://api.example.com/v1").unwrap();
    let same_host_elsewhere = Url::parse("http://app.example.com/other").unwrap();

    let accepts = |mode: ScopeMode, url: &Url| {
        let target = Target::from_seed(&seed, mode).unwrap();
        ScopeFilter::new(vec![target], vec![]).in_scope(url)
    };

    assert!(accepts(ScopeMode::RegisteredDomain, &other_sub));
    assert!(!accepts(ScopeMode::Host, &other_sub));
    assert!(accepts(ScopeMode::Host, &same_host_elsewhere));
    assert!(!accepts(ScopeMode::Prefix, &same_host_elsewhere));
    assert!(accepts(
        ScopeMode::Prefix,
        &Url::parse("http://app.example.com/portal/admin").unwrap()
    ));
}

#[test]
fn test_per_seed_scope_state() {
    // Two seeds on the same host with different modes: membership is the
    // union of what each target accepts.
    let host_seed = Url::parse("http://example.com/").unwrap();
    let prefix_seed = Url::parse("http://example.com/api/").unwrap();
    let targets = vec![
        Target::from_seed(&prefix_seed, ScopeMode::Prefix).unwrap(),
        Target::from_seed(&host_seed, ScopeMode::Host).unwrap(),
    ];
    let scope = ScopeFilter::new(targets, vec![]);
    assert!(scope.in_scope(&Url::parse("http://example.com/api/v2").unwrap()));
    assert!(scope.in_scope(&Url::parse("http://example.com/other").unwrap()));
    assert!(!scope.in_scope(&Url::parse("http://sub.example.com/").unwrap()));
}
