//! End-to-end tests over the pure, kernel-free parts of the pipeline: the
//! Source Rewriter's passes composed together, and config loading from a
//! real file on disk. Chain/slot bookkeeping scenarios (S1, S2) live as
//! inline unit tests in `src/chain.rs` where the types they exercise are
//! defined; map-extraction (S3), redirect resolution (S4), and log
//! expansion (S5) likewise live next to `src/rewriter.rs` and
//! `src/events.rs`. This file checks the passes compose correctly end to
//! end, matching invariant 8 from the spec: a source with no
//! `__attributes__` annotations round-trips modulo comment removal and the
//! header/wrapper prepend.

use dechainy_core::rewriter;
use dechainy_core::templates;

#[test]
fn full_pipeline_with_no_annotations_round_trips() {
    let source = r#"
        // a trivial passthrough probe
        int internal_handler(struct CTXTYPE *ctx) {
            return PASS;
        }
    "#;

    let no_comments = rewriter::remove_c_comments(source);
    let formatted = rewriter::format_for_hook("ingress", "xdp", &no_comments);
    let redirected = rewriter::resolve_redirects(&formatted, |_| None).unwrap();
    let logged = rewriter::expand_dp_log(&redirected);
    let with_header = format!(
        "{}\n{}\n{}",
        templates::HELPERS_H,
        templates::WRAPPER_C,
        logged
    );
    let (original, swap, features) = rewriter::extract_map_attributes(&with_header);

    assert!(swap.is_none());
    assert!(features.is_empty());
    assert!(original.contains("int internal_handler(struct CTXTYPE *ctx)"));
    assert!(!original.contains("a trivial passthrough probe"));
    assert!(original.contains("struct Metadata"));
}

#[test]
fn config_loads_from_real_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        log_level = 4

        [interfaces.eth0]
        xdp_mode = "drv"
        "#
    )
    .unwrap();

    let config = dechainy_core::config::config_from_file(file.path());
    assert_eq!(config.log_level, 4);
    let ifaces = config.interfaces.expect("interfaces present");
    assert!(ifaces.contains_key("eth0"));
}
