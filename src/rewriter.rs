//! Textual passes applied to probe C source before it reaches the compiler:
//! comment stripping, `dp_log` expansion, `REDIRECT` resolution, and
//! map-attribute extraction with swap-map cloning. Every pass is pure and
//! reentrant — no pass touches the filesystem or the kernel except through
//! the `resolve_ifindex` callback threaded into redirect resolution.

use std::collections::HashMap;

use regex::Regex;

use crate::errors::{DeChainyError, Result};
use crate::types::MetricFeatures;

/// Strips `//` line comments and `/* */` block comments while leaving
/// string and character literals untouched. Mirrors the original's
/// alternation-based approach: comment and literal branches are matched by
/// the same regex, but only comment matches are replaced.
pub fn remove_c_comments(text: &str) -> String {
    // Alternatives, in priority order: line comment, block comment,
    // char literal, string literal. `regex` crate takes the leftmost
    // alternative that matches at each position, same semantics as the
    // original's compiled pattern.
    let re = Regex::new(r#"//.*?(\n|$)|/\*[\s\S]*?\*/|'(?:\\.|[^\\'])*'|"(?:\\.|[^\\"])*""#)
        .expect("static regex is valid");
    re.replace_all(text, |caps: &regex::Captures| {
        let whole = &caps[0];
        if whole.starts_with("//") {
            // Preserve the trailing newline so line numbers survive.
            if whole.ends_with('\n') {
                "\n".to_string()
            } else {
                String::new()
            }
        } else if whole.starts_with("/*") {
            " ".to_string()
        } else {
            // string or char literal: leave as-is
            whole.to_string()
        }
    })
    .into_owned()
}

/// Replaces `return REDIRECT(<ifname>);` with an inline ifindex assignment
/// and a call to the kernel's redirect helper. `resolve_ifindex` is called
/// once per occurrence (back-to-front so earlier rewrites can't shift the
/// byte offsets of matches not yet processed).
pub fn resolve_redirects(
    text: &str,
    resolve_ifindex: impl Fn(&str) -> Option<u32>,
) -> Result<String> {
    let re = Regex::new(r"return\s+REDIRECT\(\s*([A-Za-z0-9_]+)\s*\)\s*;").expect("valid regex");
    let matches: Vec<_> = re.captures_iter(text).collect();
    let mut out = text.to_string();
    for caps in matches.into_iter().rev() {
        let whole = caps.get(0).expect("group 0 always present");
        let ifname = &caps[1];
        let idx = resolve_ifindex(ifname)
            .ok_or_else(|| DeChainyError::UnknownRedirectTarget(ifname.to_string()))?;
        let replacement = format!("u32 index = {idx}; return bpf_redirect(&index, 0);");
        out.replace_range(whole.start()..whole.end(), &replacement);
    }
    Ok(out)
}

/// Expands `dp_log(LEVEL, fmt, args...)` into a level-gated perf-buffer
/// submit. The level comparison is emitted as a runtime `if` against the
/// `LOG_LEVEL` cflag so the compiler can dead-strip disabled levels.
pub fn expand_dp_log(text: &str) -> String {
    let re = Regex::new(r"dp_log\s*\(\s*([A-Za-z0-9_]+)\s*,(.*?)\)\s*;").expect("valid regex");
    let matches: Vec<_> = re.captures_iter(text).collect();
    let mut out = text.to_string();
    for caps in matches.into_iter().rev() {
        let whole = caps.get(0).expect("group 0 always present");
        let level = &caps[1];
        let rest = caps[2].trim();
        let replacement = format!(
            "if ({level} <= LOG_LEVEL) {{ LOG_STRUCT(msg_struct, {level}, {rest}); \
             log_buffer.perf_submit(ctx, &msg_struct, sizeof(msg_struct)); }}"
        );
        out.replace_range(whole.start()..whole.end(), &replacement);
    }
    out
}

/// One parsed `BPF_TABLE`/`BPF_QUEUESTACK`/`BPF_PERF` declaration.
struct MapDecl {
    start: usize,
    end: usize,
    map_name: String,
    prefix: String,
    attrs: Option<MetricFeatures>,
    /// Declaration text with the `__attributes__(...)` suffix stripped.
    stripped: String,
}

fn parse_attrs(raw: &str) -> MetricFeatures {
    MetricFeatures {
        swap: raw.contains("SWAP"),
        export: raw.contains("EXPORT"),
        empty: raw.contains("EMPTY"),
    }
}

fn find_map_decls(text: &str) -> Vec<MapDecl> {
    let re = Regex::new(
        r"(?m)^(BPF_TABLE|BPF_QUEUESTACK|BPF_PERF)[A-Za-z_]*\(([^;]*?)\)(\s*__attributes__\s*\(([^)]*)\))?\s*;",
    )
    .expect("valid regex");
    let mut out = Vec::new();
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 present");
        let prefix = caps[1].to_string();
        let args = caps[2].to_string();
        let attrs = caps.get(4).map(|m| parse_attrs(m.as_str()));
        // Map name position mirrors the original: for BPF_QUEUESTACK/BPF_PERF
        // it's the first comma-separated argument; for BPF_TABLE it's the
        // third (type, key, leaf, name, ...).
        let parts: Vec<&str> = args.split(',').map(|s| s.trim()).collect();
        let map_name = if prefix.starts_with("BPF_QUEUESTACK") || prefix.starts_with("BPF_PERF") {
            parts.first().copied().unwrap_or("").to_string()
        } else {
            parts.get(3).copied().unwrap_or("").to_string()
        };
        let stripped = if let Some(m) = caps.get(3) {
            let decl = whole.as_str();
            decl.replacen(m.as_str(), "", 1)
        } else {
            whole.as_str().to_string()
        };
        out.push(MapDecl {
            start: whole.start(),
            end: whole.end(),
            map_name,
            prefix,
            attrs,
            stripped,
        });
    }
    out
}

/// Rewrites a declaration's storage-class prefix to its shared/extern form,
/// per the original's rule: declarators with at most one underscore (e.g.
/// `BPF_TABLE`) get a `_SHARED` suffix appended; declarators with more than
/// one underscore (e.g. `BPF_TABLE_PUBLIC`) collapse to their first two
/// underscore-joined segments (e.g. `BPF_TABLE`) and are marked `extern`.
fn to_shared_decl(decl: &MapDecl, full_text: &str) -> String {
    let original = &full_text[decl.start..decl.end];
    if decl.prefix.matches('_').count() <= 1 {
        let shared_prefix = format!("{}_SHARED", decl.prefix);
        original.replacen(&decl.prefix, &shared_prefix, 1)
    } else {
        let segments: Vec<&str> = decl.prefix.split('_').collect();
        let collapsed = segments.into_iter().take(2).collect::<Vec<_>>().join("_");
        format!("extern {}", original.replacen(&decl.prefix, &collapsed, 1))
    }
}

/// Map-attribute extraction and swap-map cloning: the final pass of the
/// rewriter, run after comment stripping/log expansion/redirect resolution
/// and header/wrapper prepend. Returns the (possibly edited) original
/// source, an optional cloned source (present only if at least one map is
/// SWAP-flagged), and the per-map feature table.
pub fn extract_map_attributes(
    text: &str,
) -> (String, Option<String>, HashMap<String, MetricFeatures>) {
    let decls = find_map_decls(text);
    let mut features = HashMap::new();
    for d in &decls {
        if let Some(attrs) = d.attrs {
            features.insert(d.map_name.clone(), attrs);
        }
    }
    let need_swap = features.values().any(|f| f.swap);

    let mut original = text.to_string();
    let mut cloned = if need_swap { Some(text.to_string()) } else { None };

    // Back-to-front so earlier edits don't shift offsets of later (lower
    // start) declarations still to be processed.
    for d in decls.iter().rev() {
        // Strip the __attributes__ suffix from the original source
        // regardless of swap status.
        original.replace_range(d.start..d.end, &d.stripped);

        if let Some(cloned_text) = cloned.as_mut() {
            let is_swap = features.get(&d.map_name).is_some_and(|f| f.swap);
            if is_swap {
                // Private in the clone; renamed to `{name}_1` in a later pass.
                cloned_text.replace_range(d.start..d.end, &d.stripped);
            } else {
                let shared = to_shared_decl(d, text);
                cloned_text.replace_range(d.start..d.end, &shared);
                original.replace_range(d.start..d.end, &shared);
            }
        }
    }

    if let Some(cloned_text) = cloned.as_mut() {
        for (name, feat) in &features {
            if feat.swap {
                let re = Regex::new(&format!(r"\b{}\b", regex::escape(name))).expect("valid regex");
                *cloned_text = re.replace_all(cloned_text, format!("{name}_1")).into_owned();
            }
        }
    }

    (original, cloned, features)
}

/// Substitutes the `PROGRAM_TYPE` and `MODE` sentinels left in the header
/// template with the concrete direction and map-suffix for this hook.
pub fn format_for_hook(direction_str: &str, map_suffix: &str, code: &str) -> String {
    code.replace("PROGRAM_TYPE", direction_str)
        .replace("MODE", map_suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments_but_not_literals() {
        let src = "int x = 1; // comment\n/* block */ char *s = \"// not a comment\";";
        let out = remove_c_comments(src);
        assert!(!out.contains("comment\n") || out.contains("\n"));
        assert!(out.contains("\"// not a comment\""));
        assert!(!out.contains("/* block */"));
    }

    #[test]
    fn redirect_resolves_known_interface() {
        let src = "int f() { return REDIRECT(lo); }";
        let out = resolve_redirects(src, |name| if name == "lo" { Some(1) } else { None }).unwrap();
        assert!(out.contains("u32 index = 1; return bpf_redirect(&index, 0);"));
    }

    #[test]
    fn redirect_fails_on_unknown_interface() {
        let src = "return REDIRECT(doesnotexist0);";
        let err = resolve_redirects(src, |_| None).unwrap_err();
        assert!(matches!(err, DeChainyError::UnknownRedirectTarget(_)));
    }

    #[test]
    fn dp_log_expands_with_level_guard() {
        let src = r#"dp_log(INFO, "got %d bytes", len);"#;
        let out = expand_dp_log(src);
        assert!(out.contains("if (INFO <= LOG_LEVEL)"));
        assert!(out.contains("log_buffer.perf_submit"));
    }

    #[test]
    fn no_attributes_round_trips_modulo_whitespace() {
        let src = r#"BPF_TABLE("hash", u32, u64, totals, 1024);"#;
        let (orig, cloned, features) = extract_map_attributes(src);
        assert!(orig.contains("BPF_TABLE(\"hash\", u32, u64, totals, 1024)"));
        assert!(cloned.is_none());
        assert!(features.is_empty());
    }

    #[test]
    fn swap_map_extraction_matches_scenario_s3() {
        let src = concat!(
            r#"BPF_TABLE("hash", u32, u64, counters, 1024) __attributes__(SWAP|EXPORT);"#,
            "\n",
            r#"BPF_TABLE("array", u32, u64, totals, 1) __attributes__(EXPORT);"#,
        );
        let (_original, cloned, features) = extract_map_attributes(src);
        let counters = features.get("counters").expect("counters present");
        assert!(counters.swap && counters.export);
        let totals = features.get("totals").expect("totals present");
        assert!(!totals.swap && totals.export);

        let cloned = cloned.expect("swap map present, clone expected");
        assert!(cloned.contains("counters_1"));
        assert!(cloned.contains("extern") || cloned.contains("_SHARED"));
    }
}
