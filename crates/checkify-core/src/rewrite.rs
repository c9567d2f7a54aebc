//! Source rewriting
//!
//! Splices checked pointer spellings into the original text by byte span.
//! The planner never reformats: every edit replaces exactly the span the
//! bridge recorded for a declaration, or inserts checked-region braces
//! around statement runs, so untouched text survives byte for byte.

use crate::constraints::{Qualifier, SolvedStore};
use crate::error::{CheckifyError, Result};
use crate::generate::GeneratedModule;
use crate::hir::CModule;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where rewritten text goes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Overwrite the input file.
    InPlace,
    /// Write `foo.c` to `foo.<postfix>.c` next to the input.
    Postfix(String),
    /// Print to standard output.
    Stdout,
}

/// A single text splice. Insertions have an empty span.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Plans and applies rewrites for solved translation units.
pub struct RewritePlanner<'a> {
    solved: &'a SolvedStore,
    /// When false, only `_Ptr` rewrites are applied; `Arr` and `NtArr`
    /// sites are left alone because their spellings need bounds the tool
    /// does not infer.
    all_levels: bool,
    add_checked_regions: bool,
}

impl<'a> RewritePlanner<'a> {
    pub fn new(solved: &'a SolvedStore, all_levels: bool, add_checked_regions: bool) -> Self {
        Self {
            solved,
            all_levels,
            add_checked_regions,
        }
    }

    /// Produce the rewritten text for one translation unit.
    pub fn rewrite_module(&self, module: &CModule, generated: &GeneratedModule) -> String {
        let mut edits = self.site_edits(module);
        if self.add_checked_regions {
            edits.extend(self.region_edits(generated));
        }
        // Apply back to front so earlier offsets stay valid. At equal
        // start, wider edits go first so insertions land in front of the
        // text they precede.
        edits.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));
        let mut text = module.source.clone();
        let mut applied = 0usize;
        let mut last_start = usize::MAX;
        for edit in edits {
            // Overlapping spans would corrupt the splice; keep the first.
            if edit.end > last_start || edit.end > text.len() {
                continue;
            }
            last_start = edit.start;
            text.replace_range(edit.start..edit.end, &edit.text);
            applied += 1;
        }
        debug!(file = %module.file.display(), edits = applied, "rewrote translation unit");
        text
    }

    /// Declaration rewrites: one edit per non-Wild site in this file.
    fn site_edits(&self, module: &CModule) -> Vec<Edit> {
        let file = module.file.display().to_string();
        let mut edits = Vec::new();
        for var in self.solved.vars() {
            if var.loc.file != file || var.sites.is_empty() {
                continue;
            }
            let qualifier = self.solved.qualifier(var.id);
            if !self.all_levels && qualifier != Qualifier::Ptr {
                continue;
            }
            for site in &var.sites {
                let spelling = match qualifier.checked_spelling(&site.pointee_text) {
                    Some(spelling) => spelling,
                    None => continue,
                };
                edits.push(Edit {
                    start: site.span.start,
                    end: site.span.end,
                    text: format!("{} {}", spelling, site.name),
                });
            }
        }
        edits
    }

    /// Checked-region insertions: wrap maximal runs of top-level statements
    /// whose every referenced pointer solved to a checked level.
    fn region_edits(&self, generated: &GeneratedModule) -> Vec<Edit> {
        let mut edits = Vec::new();
        for function in &generated.functions {
            let mut run_start: Option<usize> = None;
            let flush = |edits: &mut Vec<Edit>, from: Option<usize>, to: usize| {
                if let Some(from) = from {
                    let stmts = &function.stmts[from..to];
                    if stmts.iter().any(|s| !s.vars.is_empty()) {
                        edits.push(Edit {
                            start: stmts[0].span.start,
                            end: stmts[0].span.start,
                            text: "_Checked { ".into(),
                        });
                        let end = stmts[stmts.len() - 1].span.end;
                        edits.push(Edit {
                            start: end,
                            end,
                            text: " }".into(),
                        });
                    }
                }
            };
            for (i, stmt) in function.stmts.iter().enumerate() {
                let safe = !stmt.opaque
                    && stmt
                        .vars
                        .iter()
                        .all(|&v| self.solved.qualifier(v).is_checked());
                if safe {
                    run_start.get_or_insert(i);
                } else {
                    flush(&mut edits, run_start.take(), i);
                }
            }
            flush(&mut edits, run_start.take(), function.stmts.len());
        }
        edits
    }
}

/// Destination path for a postfixed output: `dir/foo.c` with postfix
/// `checked` becomes `dir/foo.checked.c`.
pub fn postfixed_path(path: &Path, postfix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.{postfix}.{ext}"),
        None => format!("{stem}.{postfix}"),
    };
    path.with_file_name(name)
}

/// Emit rewritten text according to the output mode.
pub fn emit(path: &Path, text: &str, mode: &OutputMode) -> Result<()> {
    match mode {
        OutputMode::Stdout => {
            println!("{text}");
            Ok(())
        }
        OutputMode::InPlace => write_file(path, text),
        OutputMode::Postfix(postfix) => {
            let dest = postfixed_path(path, postfix);
            info!(from = %path.display(), to = %dest.display(), "writing rewritten unit");
            write_file(&dest, text)
        }
    }
}

fn write_file(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).map_err(|source| CheckifyError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_bridge::AstBridge;
    use crate::constraints::{ConstraintStore, Solver};
    use crate::generate::ConstraintGenerator;
    use crate::interfaces::InterfacePolicy;
    use std::path::PathBuf;

    fn rewrite(source: &str, all_levels: bool, regions: bool) -> String {
        let module = AstBridge::new()
            .lower_source(&PathBuf::from("test.c"), source.to_string())
            .expect("parse failure");
        let policy = InterfacePolicy::default();
        let mut store = ConstraintStore::new();
        let mut generator = ConstraintGenerator::new(&mut store, &policy);
        let generated = generator.generate(&module);
        let solved = Solver::solve(store);
        RewritePlanner::new(&solved, all_levels, regions).rewrite_module(&module, &generated)
    }

    #[test]
    fn test_ptr_declaration_rewritten() {
        let out = rewrite("void f(void) { int n; int *p = &n; *p = 1; }\n", false, false);
        assert!(out.contains("_Ptr<int> p = &n"), "got: {out}");
    }

    #[test]
    fn test_wild_site_untouched() {
        let src = "void f(void) { int *r; mystery(r); }\n";
        let out = rewrite(src, false, false);
        assert_eq!(out, src);
    }

    #[test]
    fn test_arr_needs_all_levels() {
        let src = "void f(int *q) { q[3] = 1; }\n";
        let safe = rewrite(src, false, false);
        assert_eq!(safe, src);
        let all = rewrite(src, true, false);
        assert!(all.contains("_Array_ptr<int> q"), "got: {all}");
    }

    #[test]
    fn test_ntarr_spelling() {
        let out = rewrite(
            "void f(void) { char *msg = \"hi\"; }\n",
            true,
            false,
        );
        assert!(out.contains("_Nt_array_ptr<char> msg"), "got: {out}");
    }

    #[test]
    fn test_mixed_file_rewrites_only_checked_sites() {
        let src = "void f(void) { int n; int *a = &n; int *b; mystery(b); *a = 2; }\n";
        let out = rewrite(src, false, false);
        assert!(out.contains("_Ptr<int> a"), "got: {out}");
        assert!(out.contains("int *b;"), "got: {out}");
    }

    #[test]
    fn test_checked_region_wraps_safe_run() {
        let src = "void f(int *q) { q[0] = 1; q[1] = 2; }\n";
        let out = rewrite(src, true, true);
        assert!(out.contains("_Checked { "), "got: {out}");
        assert!(out.contains(" }"), "got: {out}");
    }

    #[test]
    fn test_checked_region_excludes_wild_statement() {
        let src = "void f(void) { int *r; mystery(r); }\n";
        let out = rewrite(src, true, true);
        assert!(!out.contains("_Checked"), "got: {out}");
    }

    #[test]
    fn test_postfixed_path_inserts_before_extension() {
        assert_eq!(
            postfixed_path(Path::new("src/foo.c"), "checked"),
            PathBuf::from("src/foo.checked.c")
        );
        assert_eq!(
            postfixed_path(Path::new("Makefile"), "checked"),
            PathBuf::from("Makefile.checked")
        );
    }

    #[test]
    fn test_rewrite_preserves_unrelated_text() {
        let src = "/* header */\nint add(int a, int b) { return a + b; }\n";
        let out = rewrite(src, true, false);
        assert_eq!(out, src);
    }
}
