//! Python-syntax helpers shared by the security gate, the structural
//! validator, and the tool-script compiler.
//!
//! Everything here is read-only tree inspection; no source is ever executed.

use tree_sitter::{Node, Parser, Tree};

use crate::error::{PolicyError, PolicyResult};

/// Parses tool source into a concrete syntax tree.
///
/// The returned tree may contain `ERROR`/`MISSING` nodes; use
/// [`first_syntax_error`] to detect them.
///
/// # Errors
///
/// Returns [`PolicyError::Parser`] when the grammar cannot be loaded or the
/// parser gives up.
pub fn parse_source(source: &str) -> PolicyResult<Tree> {
    let language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|err| PolicyError::parser(format!("failed to load python grammar: {err}")))?;
    parser
        .parse(source, None)
        .ok_or_else(|| PolicyError::parser("parser returned no tree"))
}

/// Location of the first unparsable region of a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
    /// Offending text, possibly empty for missing tokens.
    pub snippet: String,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.snippet.is_empty() {
            write!(f, "invalid syntax at line {}, column {}", self.line, self.column)
        } else {
            write!(
                f,
                "invalid syntax at line {}, column {}: `{}`",
                self.line, self.column, self.snippet
            )
        }
    }
}

/// Returns the first `ERROR` or `MISSING` node in document order.
#[must_use]
pub fn first_syntax_error(tree: &Tree, source: &str) -> Option<SyntaxIssue> {
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }

    let mut found = None;
    walk(root, &mut |node| {
        if found.is_none() && (node.is_error() || node.is_missing()) {
            let position = node.start_position();
            let snippet: String = node_text(node, source)
                .lines()
                .next()
                .unwrap_or_default()
                .chars()
                .take(40)
                .collect();
            found = Some(SyntaxIssue {
                line: position.row + 1,
                column: position.column + 1,
                snippet,
            });
        }
    });

    // `has_error` can be set without a dedicated node on some recoveries.
    found.or(Some(SyntaxIssue {
        line: 1,
        column: 1,
        snippet: String::new(),
    }))
}

/// Deepest nesting accepted by the gate, the validator, and the compiler.
///
/// Lowering and evaluation recurse once per level, so this bounds their
/// stack use.
pub const MAX_NESTING: usize = 64;

/// Visits `node` and all descendants in pre-order.
pub fn walk<'tree, F>(node: Node<'tree>, visit: &mut F)
where
    F: FnMut(Node<'tree>),
{
    let mut cursor = node.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Number of levels below `node`; a leaf has depth 0.
#[must_use]
pub fn nesting_depth(node: Node<'_>) -> usize {
    let mut cursor = node.walk();
    let mut depth = 0_usize;
    let mut deepest = 0_usize;
    loop {
        if cursor.goto_first_child() {
            depth += 1;
            deepest = deepest.max(depth);
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return deepest;
            }
            depth -= 1;
        }
    }
}

/// Describes the nesting violation of `tree`, if any.
#[must_use]
pub fn nesting_violation(tree: &Tree) -> Option<String> {
    let depth = nesting_depth(tree.root_node());
    (depth > MAX_NESTING).then(|| {
        format!("source is nested {depth} levels deep; at most {MAX_NESTING} are allowed")
    })
}

/// Source text spanned by `node`.
#[must_use]
pub fn node_text<'src>(node: Node<'_>, source: &'src str) -> &'src str {
    source.get(node.byte_range()).unwrap_or_default()
}

/// Named, non-comment children of `node`.
#[must_use]
pub fn named_children<'tree>(node: Node<'tree>) -> Vec<Node<'tree>> {
    (0..node.named_child_count())
        .filter_map(|index| node.named_child(index))
        .filter(|child| child.kind() != "comment")
        .collect()
}

/// Resolves a callee expression to its dotted name, e.g. `subprocess.run`.
///
/// Attribute chains rooted at something other than a name resolve to the
/// trailing attributes only; every other expression resolves to an empty string.
#[must_use]
pub fn dotted_name(node: Node<'_>, source: &str) -> String {
    match node.kind() {
        "identifier" => node_text(node, source).to_owned(),
        "attribute" => {
            let attribute = node
                .child_by_field_name("attribute")
                .map(|attr| node_text(attr, source))
                .unwrap_or_default();
            let object = node
                .child_by_field_name("object")
                .map(|object| dotted_name(object, source))
                .unwrap_or_default();
            if object.is_empty() {
                attribute.to_owned()
            } else {
                format!("{object}.{attribute}")
            }
        }
        _ => String::new(),
    }
}

/// Piece of a string literal.
#[derive(Debug, Clone)]
pub enum StringPiece<'tree> {
    /// Literal text with escapes already decoded.
    Text(String),
    /// An f-string replacement field.
    Interpolation {
        /// The embedded expression.
        expression: Node<'tree>,
        /// Format specification without the leading colon.
        format_spec: Option<String>,
    },
}

/// Decomposes a `string` node into literal text and interpolations.
#[must_use]
pub fn string_pieces<'tree>(node: Node<'tree>, source: &str) -> Vec<StringPiece<'tree>> {
    let mut prefix = String::new();
    let mut pieces = Vec::new();

    for index in 0..node.child_count() {
        let Some(child) = node.child(index) else {
            continue;
        };
        match child.kind() {
            "string_start" => {
                prefix = node_text(child, source)
                    .chars()
                    .take_while(|c| c.is_ascii_alphabetic())
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
            }
            "string_content" | "escape_sequence" => {
                let raw = node_text(child, source);
                let mut text = if prefix.contains('r') {
                    raw.to_owned()
                } else {
                    decode_escapes(raw)
                };
                if prefix.contains('f') {
                    text = text.replace("{{", "{").replace("}}", "}");
                }
                pieces.push(StringPiece::Text(text));
            }
            "interpolation" => {
                if let Some(expression) = child.child_by_field_name("expression") {
                    let format_spec = child
                        .child_by_field_name("format_specifier")
                        .map(|spec| node_text(spec, source).trim_start_matches(':').to_owned());
                    pieces.push(StringPiece::Interpolation {
                        expression,
                        format_spec,
                    });
                }
            }
            _ => {}
        }
    }

    pieces
}

/// Returns the value of a constant string literal.
///
/// Accepts `string` and `concatenated_string` nodes without interpolations;
/// everything else yields `None`.
#[must_use]
pub fn constant_string(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "string" => {
            let mut value = String::new();
            for piece in string_pieces(node, source) {
                match piece {
                    StringPiece::Text(text) => value.push_str(&text),
                    StringPiece::Interpolation { .. } => return None,
                }
            }
            Some(value)
        }
        "concatenated_string" => named_children(node)
            .into_iter()
            .map(|part| constant_string(part, source))
            .collect(),
        _ => None,
    }
}

/// Decodes Python backslash escapes.
#[must_use]
pub fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\u{7}'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => {}
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if digits.len() == width => out.push(decoded),
                    _ => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&digits);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    out
}

/// A formal parameter of a function definition.
#[derive(Debug, Clone)]
pub struct FormalParameter<'tree> {
    /// Bound name.
    pub name: String,
    /// Annotation text, if any.
    pub annotation: Option<String>,
    /// Default value expression, if any.
    pub default: Option<Node<'tree>>,
}

/// Lists the positional and keyword parameters of a `parameters` node.
///
/// Star-args (`*args`, `**kwargs`) and separators are skipped.
#[must_use]
pub fn formal_parameters<'tree>(parameters: Node<'tree>, source: &str) -> Vec<FormalParameter<'tree>> {
    let annotation = |node: Node<'tree>| {
        node.child_by_field_name("type")
            .map(|ty| node_text(ty, source).trim().to_owned())
    };

    named_children(parameters)
        .into_iter()
        .filter_map(|param| match param.kind() {
            "identifier" => Some(FormalParameter {
                name: node_text(param, source).to_owned(),
                annotation: None,
                default: None,
            }),
            "typed_parameter" => {
                let name = named_children(param)
                    .into_iter()
                    .find(|child| child.kind() == "identifier")?;
                Some(FormalParameter {
                    name: node_text(name, source).to_owned(),
                    annotation: annotation(param),
                    default: None,
                })
            }
            "default_parameter" | "typed_default_parameter" => {
                let name = param.child_by_field_name("name")?;
                Some(FormalParameter {
                    name: node_text(name, source).to_owned(),
                    annotation: annotation(param),
                    default: param.child_by_field_name("value"),
                })
            }
            _ => None,
        })
        .collect()
}

/// Finds a top-level `def` named `name`, looking through decorators.
#[must_use]
pub fn top_level_function<'tree>(tree: &'tree Tree, source: &str, name: &str) -> Option<Node<'tree>> {
    named_children(tree.root_node())
        .into_iter()
        .filter_map(|stmt| match stmt.kind() {
            "function_definition" => Some(stmt),
            "decorated_definition" => stmt
                .child_by_field_name("definition")
                .filter(|def| def.kind() == "function_definition"),
            _ => None,
        })
        .find(|def| {
            def.child_by_field_name("name")
                .is_some_and(|ident| node_text(ident, source) == name)
        })
}

/// Modules named by a single `import` or `from ... import` statement.
///
/// Each entry is the full dotted module path; relative imports keep their
/// dots. Any other node yields nothing.
#[must_use]
pub fn import_targets(statement: Node<'_>, source: &str) -> Vec<String> {
    match statement.kind() {
        "import_statement" => named_children(statement)
            .into_iter()
            .filter_map(|name| {
                if name.kind() == "aliased_import" {
                    name.child_by_field_name("name")
                } else {
                    Some(name)
                }
            })
            .map(|target| node_text(target, source).to_owned())
            .collect(),
        "import_from_statement" => statement
            .child_by_field_name("module_name")
            .map(|module| vec![node_text(module, source).to_owned()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Modules imported anywhere in the tree, in document order.
#[must_use]
pub fn imported_modules(tree: &Tree, source: &str) -> Vec<String> {
    let mut modules = Vec::new();
    walk(tree.root_node(), &mut |node| {
        modules.extend(import_targets(node, source));
    });
    modules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_call<'tree>(tree: &'tree Tree) -> Node<'tree> {
        let mut call = None;
        walk(tree.root_node(), &mut |node| {
            if call.is_none() && node.kind() == "call" {
                call = Some(node);
            }
        });
        call.expect("call node")
    }

    #[test]
    fn resolves_dotted_callee() {
        let source = "subprocess.check_output(['ls'])";
        let tree = parse_source(source).unwrap();
        let call = first_call(&tree);
        let callee = call.child_by_field_name("function").unwrap();
        assert_eq!(dotted_name(callee, source), "subprocess.check_output");
    }

    #[test]
    fn measures_nesting_without_recursing() {
        let shallow = parse_source("x = 1\n").unwrap();
        assert!(nesting_depth(shallow.root_node()) < 6);
        assert!(nesting_violation(&shallow).is_none());

        let source = format!("x = {}1{}\n", "(".repeat(2_000), ")".repeat(2_000));
        let deep = parse_source(&source).unwrap();
        assert!(nesting_depth(deep.root_node()) > 2_000);
        assert!(nesting_violation(&deep).is_some());

        let mut visited = 0_usize;
        walk(deep.root_node(), &mut |_| visited += 1);
        assert!(visited > 6_000);
    }

    #[test]
    fn detects_syntax_errors() {
        let source = "def broken(:\n    return 1\n";
        let tree = parse_source(source).unwrap();
        let issue = first_syntax_error(&tree, source).expect("syntax error");
        assert_eq!(issue.line, 1);

        let valid = "def ok():\n    return 1\n";
        let tree = parse_source(valid).unwrap();
        assert!(first_syntax_error(&tree, valid).is_none());
    }

    #[test]
    fn reads_constant_strings() {
        let source = "run('RM -rf /' 'tmp', f'{x}')";
        let tree = parse_source(source).unwrap();
        let call = first_call(&tree);
        let args = named_children(call.child_by_field_name("arguments").unwrap());
        assert_eq!(
            constant_string(args[0], source).as_deref(),
            Some("RM -rf /tmp")
        );
        assert!(constant_string(args[1], source).is_none());
    }

    #[test]
    fn decodes_escapes() {
        assert_eq!(decode_escapes(r"a\nb\t\x41é\q"), "a\nb\tAé\\q");
    }

    #[test]
    fn lists_formal_parameters() {
        let source = "def f(a, b: float, c=1, d: int = 2, *rest, e, **kw):\n    pass\n";
        let tree = parse_source(source).unwrap();
        let def = top_level_function(&tree, source, "f").unwrap();
        let params = formal_parameters(def.child_by_field_name("parameters").unwrap(), source);
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d", "e"]);
        assert_eq!(params[1].annotation.as_deref(), Some("float"));
        assert!(params[2].default.is_some());
        assert!(params[0].default.is_none());
    }

    #[test]
    fn collects_imports() {
        let source = "import os.path as p, json\nfrom math import sqrt\nfrom . import x\n";
        let tree = parse_source(source).unwrap();
        let modules = imported_modules(&tree, source);
        assert!(modules.contains(&"os.path".to_owned()));
        assert!(modules.contains(&"json".to_owned()));
        assert!(modules.contains(&"math".to_owned()));
        assert_eq!(modules.len(), 4);
    }
}
