//! Comment syntax per file extension and the line classifier built on it.
//!
//! Each extension resolves once to a static [`CommentRules`]; the same
//! [`LineClassifier`] state machine serves both whole-buffer and streamed
//! input, so a file counts identically whichever read path its size selects.

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCounts {
    pub total: u64,
    pub code: u64,
    pub comment: u64,
    pub blank: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CommentRules {
    pub line: &'static [&'static str],
    pub block: &'static [(&'static str, &'static str)],
    /// Whitespace-only (but non-empty) lines count as code.
    pub indentation_sensitive: bool,
}

const fn rules(
    line: &'static [&'static str],
    block: &'static [(&'static str, &'static str)],
    indentation_sensitive: bool,
) -> CommentRules {
    CommentRules {
        line,
        block,
        indentation_sensitive,
    }
}

const C_BLOCK: &[(&str, &str)] = &[("/*", "*/")];

static PLAIN: CommentRules = rules(&[], &[], false);
static C_STYLE: CommentRules = rules(&["//"], C_BLOCK, false);
static C_DOC: CommentRules = rules(&["//", "//!", "///"], C_BLOCK, false);
static GROOVY: CommentRules = rules(
    &["//"],
    &[("/*", "*/"), ("\"\"\"", "\"\"\""), ("'''", "'''")],
    false,
);
static SHELL: CommentRules = rules(&["//", "#"], &[], false);
static PERL: CommentRules = rules(&["//", "#", "%"], &[("=pod", "=cut")], false);
static R_LANG: CommentRules = rules(&["//", "#"], &[], false);
static OBJC_MATLAB: CommentRules = rules(&["//", "%"], &[], false);
static SLASH_ONLY: CommentRules = rules(&["//"], &[], false);
static SQL_LUA: CommentRules = rules(&["//", "--"], C_BLOCK, false);
static PYTHON: CommentRules = rules(&["#"], &[("\"\"\"", "\"\"\""), ("'''", "'''")], true);
static RUBY: CommentRules = rules(&["#"], &[("\"\"\"", "\"\"\""), ("=begin", "=end")], true);
static YAML: CommentRules = rules(&["#"], &[], true);
static HASH: CommentRules = rules(&["#"], &[], false);
static HASKELL: CommentRules = rules(&["--"], &[("{-", "-}")], false);
static LITERATE_HASKELL: CommentRules = rules(&[], &[("{-", "-}")], false);
static DASH_DASH: CommentRules = rules(&["--"], &[], false);
static LISP: CommentRules = rules(&[";"], &[], false);
static SCHEME: CommentRules = rules(&[";"], &[("#|", "|#")], false);
static TEX: CommentRules = rules(&["%"], &[], false);
static ML: CommentRules = rules(&["(*"], &[("(*", "*)")], false);
static BATCH: CommentRules = rules(&["REM", "::"], &[], false);
static BASIC: CommentRules = rules(&["REM"], &[], false);
static CSS: CommentRules = rules(&[], C_BLOCK, false);
static SASS: CommentRules = rules(&[], C_BLOCK, true);
static MARKUP: CommentRules = rules(&[], &[("<!--", "-->")], false);
static ASP: CommentRules = rules(&[], &[("<%--", "--%>")], false);
static HANDLEBARS: CommentRules = rules(&[], &[("{{!--", "--}}")], false);
static CRYSTAL: CommentRules = rules(&[], &[("###", "###")], false);
static INDENTED: CommentRules = rules(&[], &[], true);

/// Resolve an extension (no dot, any case) to its comment rules. Unknown
/// extensions get no comment syntax at all: every non-blank line is code.
pub fn rules_for_extension(extension: &str) -> &'static CommentRules {
    let ext = extension.to_ascii_lowercase();
    match ext.as_str() {
        "js" | "ts" | "jsx" | "tsx" | "jsm" | "cjs" | "mjs" | "java" | "cs" | "go" | "php"
        | "swift" | "kt" | "scala" | "dart" => &C_STYLE,
        "c" | "cpp" | "rs" => &C_DOC,
        "groovy" => &GROOVY,
        "sh" | "bash" | "zsh" | "fish" => &SHELL,
        "pl" | "pm" => &PERL,
        "r" => &R_LANG,
        "m" => &OBJC_MATLAB,
        "mm" => &SLASH_ONLY,
        "sql" | "lua" => &SQL_LUA,
        "py" => &PYTHON,
        "rb" => &RUBY,
        "yaml" | "yml" => &YAML,
        "toml" | "dockerfile" | "dockerignore" | "gitignore" | "npmignore" | "properties"
        | "conf" | "ini" | "cfg" => &HASH,
        "haskell" | "hs" | "elm" => &HASKELL,
        "lhs" => &LITERATE_HASKELL,
        "ada" | "vhdl" | "vhd" => &DASH_DASH,
        "lisp" | "clj" | "cljs" | "cljc" | "edn" | "asm" | "s" | "nasm" | "fasm" => &LISP,
        "racket" | "scheme" => &SCHEME,
        "latex" | "tex" | "sty" | "cls" | "matlab" | "octave" | "prolog" | "swi" | "swipl" => {
            &TEX
        }
        "fsharp" | "fs" | "fsi" | "fsx" | "ml" | "mli" | "ocaml" | "ml4" | "mll" | "mly" => &ML,
        "bat" | "cmd" => &BATCH,
        "vb" | "vbs" | "vba" | "bas" => &BASIC,
        "css" | "scss" | "less" => &CSS,
        "sass" => &SASS,
        "html" | "htm" | "xhtml" | "xml" | "xsl" | "svg" | "vue" | "svelte" | "astro" => &MARKUP,
        "asp" | "aspx" => &ASP,
        "hbs" | "handlebars" => &HANDLEBARS,
        "cr" | "crystal" => &CRYSTAL,
        "coffee" | "coffeelitre" | "haml" | "slim" | "pug" | "jade" => &INDENTED,
        _ => &PLAIN,
    }
}

/// Incremental classifier. Feed physical lines (without terminators) with
/// [`LineClassifier::push_line`]; the open block comment, if any, is carried
/// between calls.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    rules: &'static CommentRules,
    open_block: Option<usize>,
    counts: LineCounts,
}

impl LineClassifier {
    pub fn new(rules: &'static CommentRules) -> Self {
        LineClassifier {
            rules,
            open_block: None,
            counts: LineCounts::default(),
        }
    }

    pub fn in_block_comment(&self) -> bool {
        self.open_block.is_some()
    }

    pub fn counts(&self) -> LineCounts {
        self.counts
    }

    pub fn finish(self) -> LineCounts {
        self.counts
    }

    pub fn push_line(&mut self, line: &str) {
        self.counts.total += 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if self.rules.indentation_sensitive && !line.is_empty() {
                self.counts.code += 1;
            } else {
                self.counts.blank += 1;
            }
            return;
        }

        if let Some(idx) = self.open_block {
            // The closing line is a comment in full, whatever follows the end token.
            let (_, end) = self.rules.block[idx];
            if trimmed.contains(end) {
                self.open_block = None;
            }
            self.counts.comment += 1;
            return;
        }

        for (idx, (start, end)) in self.rules.block.iter().enumerate() {
            if let Some(rest) = trimmed.strip_prefix(start) {
                if !rest.contains(end) {
                    self.open_block = Some(idx);
                }
                self.counts.comment += 1;
                return;
            }
        }

        if self
            .rules
            .line
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
        {
            self.counts.comment += 1;
        } else {
            self.counts.code += 1;
        }
    }
}

/// Classify a complete sequence of lines.
pub fn classify<'a, I>(lines: I, rules: &'static CommentRules) -> LineCounts
where
    I: IntoIterator<Item = &'a str>,
{
    let mut classifier = LineClassifier::new(rules);
    for line in lines {
        classifier.push_line(line);
    }
    classifier.finish()
}

/// Classify a whole text buffer. Lines end at `\n`, a trailing `\r` is
/// dropped and a final terminator does not start another line.
pub fn classify_text(text: &str, rules: &'static CommentRules) -> LineCounts {
    classify(text.lines(), rules)
}
