// Sprint 51: Scoring methods through the public API
//
// End-to-end comparisons of parsed traces: descriptor renumbering plus a
// pinned path gives a perfect in-order match, disjoint vocabularies score
// zero, and TF-IDF weighs rare syscalls above ubiquitous ones.

use dozer::equality::{CanonicalEquality, EqualityKind, NameEquality};
use dozer::parser::parse_str;
use dozer::preprocessing::{CanonicalForm, HoleSet, Pin, Preprocessor, ReplaceFileDescriptors};
use dozer::scoring::{
    Composite, IdfTable, JaccardCoefficient, MaximumCardinalityMatching, ScoringMethod,
    SyscallOverlap, Tfidf,
};
use dozer::trace::Strace;
use std::sync::Arc;

fn trace(text: &str) -> Arc<Strace> {
    Arc::new(parse_str(text, "test").trace)
}

/// Test 1: [open("/a"), read(3), close(3)] vs [open("/b"), read(4), close(4)]
#[test]
fn test_pinned_path_perfect_match() {
    let rfd = ReplaceFileDescriptors::new();
    let a = Arc::new(rfd.apply(&trace("open(\"/a\") = 3\nread(3) = 0\nclose(3) = 0\n")));
    let b = Arc::new(rfd.apply(&trace("open(\"/b\") = 4\nread(4) = 0\nclose(4) = 0\n")));

    let pinned = HoleSet::new().with(Pin::new("open", 0));
    let result = MaximumCardinalityMatching::new().score(
        &a,
        &b,
        &pinned,
        &CanonicalEquality::with_form(CanonicalForm::plain()),
    );

    assert_eq!(result.score, 1.0);
    assert_eq!(result.mapping, vec![(0, 0), (1, 1), (2, 2)]);
}

/// Test 2: socket/connect/send vs open/read/close share nothing
#[test]
fn test_disjoint_vocabularies() {
    let a = trace("socket(AF_INET, SOCK_STREAM, 0) = 3\nconnect(3) = 0\nsend(3) = 5\n");
    let b = trace("open(\"/etc/motd\") = 3\nread(3) = 5\nclose(3) = 0\n");

    let jaccard = JaccardCoefficient.score(&a, &b, &HoleSet::new(), &NameEquality);
    let mcm = MaximumCardinalityMatching::new().score(&a, &b, &HoleSet::new(), &NameEquality);
    assert_eq!(jaccard.score, 0.0);
    assert_eq!(mcm.score, 0.0);
    assert!(mcm.mapping.is_empty());
}

/// Test 3: Jaccard over name sets
#[test]
fn test_jaccard_partial_overlap() {
    let a = trace("open(\"/a\") = 3\nread(3) = 1\nclose(3) = 0\n");
    let b = trace("open(\"/a\") = 3\nwrite(3) = 1\nclose(3) = 0\n");
    let r = JaccardCoefficient.score(&a, &b, &HoleSet::new(), &NameEquality);
    assert!((r.score - 0.5).abs() < 1e-12);
    assert_eq!(
        JaccardCoefficient.score(&b, &a, &HoleSet::new(), &NameEquality).score,
        r.score
    );
}

/// Test 4: sharing a rare syscall counts more than sharing a common one
#[test]
fn test_tfidf_prefers_rare_matches() {
    let corpus: Vec<Arc<Strace>> = (0..6)
        .map(|_| trace("open(\"/x\") = 3\nclose(3) = 0\n"))
        .chain([trace("ioctl(3, TCGETS) = 0\n")])
        .collect();
    let table = IdfTable::from_corpus(corpus.iter().map(|t| t.as_ref()), &NameEquality);
    assert!(table.idf("ioctl") > table.idf("open"));

    let tfidf = Tfidf::with_corpus(table);
    let query = trace("ioctl(3, TCGETS) = 0\nopen(\"/x\") = 3\n");
    let rare = trace("ioctl(3, TCGETS) = 0\nmmap(NULL) = 0\n");
    let common = trace("open(\"/x\") = 3\nmmap(NULL) = 0\n");

    let with_rare = tfidf.score(&query, &rare, &HoleSet::new(), &NameEquality).score;
    let with_common = tfidf.score(&query, &common, &HoleSet::new(), &NameEquality).score;
    assert!(with_rare > with_common, "{} <= {}", with_rare, with_common);
}

/// Test 5: ordered matching refuses crossing pairs
#[test]
fn test_ordered_matching() {
    let a = trace("open(\"/a\") = 3\nclose(3) = 0\n");
    let b = trace("close(3) = 0\nopen(\"/a\") = 3\n");
    let free = MaximumCardinalityMatching::new().score(&a, &b, &HoleSet::new(), &NameEquality);
    let ordered = MaximumCardinalityMatching::ordered().score(&a, &b, &HoleSet::new(), &NameEquality);
    assert_eq!(free.score, 1.0);
    assert_eq!(ordered.score, 0.5);
}

/// Test 6: composite averages with weights
#[test]
fn test_composite_scoring() {
    let a = trace("open(\"/a\") = 3\nread(3) = 1\nread(3) = 1\nclose(3) = 0\n");
    let b = trace("open(\"/a\") = 3\nread(3) = 1\nclose(3) = 0\n");
    let composite = Composite::new()
        .with(JaccardCoefficient, 1.0)
        .with(MaximumCardinalityMatching::new(), 1.0);
    let r = composite.score(&a, &b, &HoleSet::new(), &NameEquality);
    // jaccard 1.0, matching 3/4
    assert!((r.score - 0.875).abs() < 1e-12);
    assert_eq!(r.mapping.len(), 3);
}

/// Test 7: overlap report between two runs
#[test]
fn test_syscall_overlap() {
    let overlap = SyscallOverlap::compute(
        &trace("open(\"/a\") = 3\nfsync(3) = 0\nclose(3) = 0\n"),
        &trace("open(\"/a\") = 3\nclose(3) = 0\nrename(\"/a\", \"/b\") = 0\n"),
    );
    assert_eq!(overlap.common.len(), 2);
    assert!(overlap.source_only.contains("fsync"));
    assert!(overlap.target_only.contains("rename"));
    assert!((overlap.overlap_ratio - 0.5).abs() < 1e-12);
}

/// Test 8: equality kinds build the named strategies
#[test]
fn test_equality_kinds() {
    for kind in [EqualityKind::Name, EqualityKind::Strict, EqualityKind::Canonical] {
        assert_eq!(kind.build().name(), kind.as_str());
    }
}
