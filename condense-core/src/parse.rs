//! Entity extraction: declarations, call graph, imports and simple metrics
//!
//! Rust, Python, JavaScript, TypeScript and Go go through tree-sitter.
//! Markdown headings become `section` entities. Everything else falls back to
//! line patterns, which find declarations but no call graph.

use crate::document::{
    EntityKind, FileMetrics, Language, Marker, MarkerKind, SemanticData, SemanticEntity,
};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

/// Grammar actually used for a file (TypeScript splits into TS/TSX)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Grammar {
    fn for_path(path: &Path, language: Language) -> Option<Self> {
        match language {
            Language::Rust => Some(Self::Rust),
            Language::Python => Some(Self::Python),
            Language::JavaScript => Some(Self::JavaScript),
            Language::TypeScript => {
                if path.extension().is_some_and(|e| e == "tsx") {
                    Some(Self::Tsx)
                } else {
                    Some(Self::TypeScript)
                }
            }
            Language::Go => Some(Self::Go),
            _ => None,
        }
    }

    fn language(self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    fn is_js_like(self) -> bool {
        matches!(self, Self::JavaScript | Self::TypeScript | Self::Tsx)
    }
}

/// Analyze one file. Never fails: unparseable input yields fewer entities.
pub fn analyze(path: &Path, content: &str) -> SemanticData {
    let language = Language::from_path(path);

    let mut data = match language {
        Some(Language::Markdown) => parse_markdown(content),
        Some(lang) => Grammar::for_path(path, lang)
            .and_then(|grammar| parse_with_tree_sitter(grammar, content))
            .unwrap_or_else(|| parse_with_patterns(content)),
        None => parse_with_patterns(content),
    };

    data.language = language;
    data.metrics = compute_metrics(content, &data.entities, language);
    data.markers = find_markers(content);
    data
}

// ---------------------------------------------------------------------------
// tree-sitter path
// ---------------------------------------------------------------------------

/// Parent context passed down during tree-sitter traversal
#[derive(Clone)]
struct ParentContext {
    name: String,
}

struct Declaration {
    entity: SemanticEntity,
    start_byte: usize,
    end_byte: usize,
    branches: u32,
}

#[derive(Default)]
struct Extraction {
    declarations: Vec<Declaration>,
    /// (byte offset, callee as `name` or `receiver.name`)
    call_sites: Vec<(usize, String)>,
    branch_sites: Vec<usize>,
    imports: Vec<String>,
    import_lines: Vec<usize>,
}

fn parse_with_tree_sitter(grammar: Grammar, source: &str) -> Option<SemanticData> {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&grammar.language()).is_err() {
        return None;
    }
    let tree = parser.parse(source, None)?;

    let mut extraction = Extraction::default();
    walk(&tree.root_node(), source, grammar, None, &mut extraction);

    let Extraction {
        declarations,
        call_sites,
        branch_sites,
        mut imports,
        mut import_lines,
    } = extraction;

    imports.dedup();
    import_lines.sort_unstable();
    import_lines.dedup();

    Some(SemanticData {
        language: None,
        entities: resolve_declarations(declarations, &call_sites, &branch_sites),
        imports,
        import_lines,
        metrics: FileMetrics::default(),
        markers: Vec::new(),
        structural: true,
    })
}

/// Pass 1: recursively collect declarations, call sites, branches and imports.
fn walk(
    node: &tree_sitter::Node,
    source: &str,
    grammar: Grammar,
    parent_ctx: Option<&ParentContext>,
    out: &mut Extraction,
) {
    collect_call_site(node, source, grammar, out);
    collect_import(node, source, grammar, out);
    if is_branch(node, grammar) {
        out.branch_sites.push(node.start_byte());
    }

    if let Some((name, kind)) = declaration_info(node, source, grammar, parent_ctx) {
        if !name.is_empty() {
            let owner = if grammar == Grammar::Go && node.kind() == "method_declaration" {
                extract_go_receiver_type(node, source)
            } else if kind == EntityKind::Method {
                parent_ctx.map(|p| p.name.clone())
            } else {
                None
            };
            let qualified_name = match &owner {
                Some(owner) => format!("{}.{}", owner, name),
                None => name.clone(),
            };
            let is_public = is_public(node, source, grammar, &name);
            out.declarations.push(Declaration {
                entity: SemanticEntity {
                    name,
                    qualified_name,
                    kind,
                    start_line: node.start_position().row + 1,
                    end_line: node.end_position().row + 1,
                    importance: kind.base_weight(),
                    doc: extract_doc(node, source, grammar),
                    calls: Vec::new(),
                    called_by: Vec::new(),
                    complexity: 1,
                    is_public,
                },
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
                branches: 0,
            });
        }
    }

    let new_ctx = determine_parent_context(node, source, grammar);
    let child_ctx = new_ctx.as_ref().or(parent_ctx);
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            walk(&child, source, grammar, child_ctx, out);
        }
    }
}

fn declaration_info(
    node: &tree_sitter::Node,
    source: &str,
    grammar: Grammar,
    parent_ctx: Option<&ParentContext>,
) -> Option<(String, EntityKind)> {
    let kind = node.kind();
    let field_name = |field: &str| node.child_by_field_name(field).map(|n| node_text(&n, source));

    match grammar {
        Grammar::Rust => match kind {
            "function_item" | "function_signature_item" => {
                let entity_kind = if parent_ctx.is_some() {
                    EntityKind::Method
                } else {
                    EntityKind::Function
                };
                Some((field_name("name")?, entity_kind))
            }
            "struct_item" | "union_item" => Some((field_name("name")?, EntityKind::Class)),
            "enum_item" | "type_item" => Some((field_name("name")?, EntityKind::Type)),
            "trait_item" => Some((field_name("name")?, EntityKind::Interface)),
            _ => None,
        },
        Grammar::Python => match kind {
            "function_definition" => {
                let entity_kind = if parent_ctx.is_some() {
                    EntityKind::Method
                } else {
                    EntityKind::Function
                };
                Some((find_child_text(node, "identifier", source)?, entity_kind))
            }
            "class_definition" => Some((find_child_text(node, "identifier", source)?, EntityKind::Class)),
            _ => None,
        },
        Grammar::JavaScript | Grammar::TypeScript | Grammar::Tsx => match kind {
            "function_declaration" | "generator_function_declaration" => {
                Some((field_name("name")?, EntityKind::Function))
            }
            "class_declaration" | "abstract_class_declaration" => {
                Some((field_name("name")?, EntityKind::Class))
            }
            "method_definition" => Some((field_name("name")?, EntityKind::Method)),
            "interface_declaration" => Some((field_name("name")?, EntityKind::Interface)),
            "type_alias_declaration" | "enum_declaration" => {
                Some((field_name("name")?, EntityKind::Type))
            }
            // const handler = () => {} / const f = function () {}
            "variable_declarator" => {
                let value = node.child_by_field_name("value")?;
                if matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
                    Some((field_name("name")?, EntityKind::Function))
                } else {
                    None
                }
            }
            _ => None,
        },
        Grammar::Go => match kind {
            "function_declaration" => Some((field_name("name")?, EntityKind::Function)),
            "method_declaration" => Some((field_name("name")?, EntityKind::Method)),
            "type_spec" => {
                let name = field_name("name")?;
                let entity_kind = match node.child_by_field_name("type").map(|t| t.kind()) {
                    Some("struct_type") => EntityKind::Class,
                    Some("interface_type") => EntityKind::Interface,
                    _ => EntityKind::Type,
                };
                Some((name, entity_kind))
            }
            _ => None,
        },
    }
}

/// Determine if a node provides parent context for its children
fn determine_parent_context(
    node: &tree_sitter::Node,
    source: &str,
    grammar: Grammar,
) -> Option<ParentContext> {
    let kind = node.kind();
    let name = match grammar {
        Grammar::Rust => match kind {
            // impl<T> Foo<T> => Foo
            "impl_item" => node.child_by_field_name("type").map(|t| {
                if t.kind() == "generic_type" {
                    t.child_by_field_name("type")
                        .map(|inner| node_text(&inner, source))
                        .unwrap_or_else(|| node_text(&t, source))
                } else {
                    node_text(&t, source)
                }
            }),
            "trait_item" => node.child_by_field_name("name").map(|n| node_text(&n, source)),
            _ => None,
        },
        Grammar::Python => match kind {
            "class_definition" => find_child_text(node, "identifier", source),
            _ => None,
        },
        Grammar::JavaScript | Grammar::TypeScript | Grammar::Tsx => match kind {
            "class_declaration" | "abstract_class_declaration" | "class" => node
                .child_by_field_name("name")
                .map(|n| node_text(&n, source)),
            _ => None,
        },
        // Go receiver types are handled per method
        Grammar::Go => None,
    };
    name.map(|name| ParentContext { name })
}

/// Extract the receiver type from a Go method declaration
fn extract_go_receiver_type(node: &tree_sitter::Node, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let param_decl = receiver.named_child(0)?;
    let type_node = param_decl.child_by_field_name("type")?;

    // *Foo => Foo
    if type_node.kind() == "pointer_type" {
        type_node.named_child(0).map(|inner| node_text(&inner, source))
    } else {
        Some(node_text(&type_node, source))
    }
}

fn collect_call_site(node: &tree_sitter::Node, source: &str, grammar: Grammar, out: &mut Extraction) {
    let is_call = match grammar {
        Grammar::Python => node.kind() == "call",
        _ => node.kind() == "call_expression",
    };
    if !is_call {
        return;
    }
    let Some(func) = node.child_by_field_name("function") else {
        return;
    };
    let (name, qualifier) = extract_call_target(&func, source);
    if name.is_empty() || !is_identifier(&name) {
        return;
    }
    let callee = match qualifier {
        Some(q) if is_identifier(&q) => format!("{}.{}", q, name),
        _ => name,
    };
    out.call_sites.push((node.start_byte(), callee));
}

/// Extract the call target (function name and optional receiver)
fn extract_call_target(func_node: &tree_sitter::Node, source: &str) -> (String, Option<String>) {
    match func_node.kind() {
        "identifier" => (node_text(func_node, source), None),
        "member_expression" | "attribute" | "field_expression" => {
            let property = func_node
                .child_by_field_name("property")
                .or_else(|| func_node.child_by_field_name("attribute"))
                .or_else(|| func_node.child_by_field_name("field"));
            let object = func_node
                .child_by_field_name("object")
                .or_else(|| func_node.child_by_field_name("value"));

            match (property, object) {
                (Some(p), Some(o)) => (node_text(&p, source), Some(node_text(&o, source))),
                (Some(p), None) => (node_text(&p, source), None),
                _ => (node_text(func_node, source), None),
            }
        }
        // Rust: Type::function
        "scoped_identifier" => match func_node.child_by_field_name("name") {
            Some(name) => {
                let path = func_node
                    .child_by_field_name("path")
                    .map(|p| node_text(&p, source));
                (node_text(&name, source), path)
            }
            None => (node_text(func_node, source), None),
        },
        // Go: pkg.Func / recv.Method
        "selector_expression" => match func_node.child_by_field_name("field") {
            Some(field) => {
                let operand = func_node
                    .child_by_field_name("operand")
                    .map(|o| node_text(&o, source));
                (node_text(&field, source), operand)
            }
            None => (node_text(func_node, source), None),
        },
        // Generic calls (foo::<T>(), Foo<T>()) resolve to the inner function
        "generic_function" => match func_node.child_by_field_name("function") {
            Some(inner) => extract_call_target(&inner, source),
            None => (String::new(), None),
        },
        _ => (String::new(), None),
    }
}

fn collect_import(node: &tree_sitter::Node, source: &str, grammar: Grammar, out: &mut Extraction) {
    let import = match (grammar, node.kind()) {
        (Grammar::Python, "import_statement") => Some(
            named_children(node)
                .filter(|c| matches!(c.kind(), "dotted_name" | "aliased_import"))
                .map(|c| match c.kind() {
                    "aliased_import" => c
                        .child_by_field_name("name")
                        .map(|n| node_text(&n, source))
                        .unwrap_or_default(),
                    _ => node_text(&c, source),
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        (Grammar::Python, "import_from_statement") => node
            .child_by_field_name("module_name")
            .map(|n| node_text(&n, source)),
        (g, "import_statement") if g.is_js_like() => node
            .child_by_field_name("source")
            .map(|n| node_text(&n, source).trim_matches(|c| c == '"' || c == '\'').to_string()),
        (Grammar::Rust, "use_declaration") => node
            .child_by_field_name("argument")
            .map(|n| node_text(&n, source)),
        (Grammar::Go, "import_spec") => node
            .child_by_field_name("path")
            .map(|n| node_text(&n, source).trim_matches('"').to_string()),
        _ => None,
    };

    if let Some(import) = import.filter(|i| !i.is_empty()) {
        out.imports.push(import);
        out.import_lines
            .extend(node.start_position().row + 1..=node.end_position().row + 1);
    }
}

fn is_branch(node: &tree_sitter::Node, grammar: Grammar) -> bool {
    let kind = node.kind();
    match grammar {
        Grammar::Rust => match kind {
            "if_expression" | "while_expression" | "for_expression" | "loop_expression"
            | "match_arm" | "try_expression" => true,
            "binary_expression" => is_logical_operator(node),
            _ => false,
        },
        Grammar::Python => matches!(
            kind,
            "if_statement"
                | "elif_clause"
                | "for_statement"
                | "while_statement"
                | "except_clause"
                | "boolean_operator"
                | "conditional_expression"
                | "for_in_clause"
                | "case_clause"
        ),
        Grammar::JavaScript | Grammar::TypeScript | Grammar::Tsx => match kind {
            "if_statement" | "for_statement" | "for_in_statement" | "while_statement"
            | "do_statement" | "switch_case" | "catch_clause" | "ternary_expression" => true,
            "binary_expression" => is_logical_operator(node),
            _ => false,
        },
        Grammar::Go => match kind {
            "if_statement" | "for_statement" | "expression_case" | "type_case"
            | "communication_case" => true,
            "binary_expression" => is_logical_operator(node),
            _ => false,
        },
    }
}

fn is_logical_operator(node: &tree_sitter::Node) -> bool {
    node.child_by_field_name("operator")
        .is_some_and(|op| matches!(op.kind(), "&&" | "||" | "??"))
}

fn is_public(node: &tree_sitter::Node, source: &str, grammar: Grammar, name: &str) -> bool {
    match grammar {
        Grammar::Rust => find_child_by_kind(node, "visibility_modifier").is_some(),
        Grammar::Python => is_public_python_name(name),
        Grammar::Go => name.chars().next().is_some_and(|c| c.is_uppercase()),
        Grammar::JavaScript | Grammar::TypeScript | Grammar::Tsx => {
            if node.kind() == "method_definition" {
                let restricted = find_child_by_kind(node, "accessibility_modifier")
                    .map(|m| node_text(&m, source))
                    .is_some_and(|m| m == "private" || m == "protected");
                !restricted && !name.starts_with('#') && !name.starts_with('_')
            } else {
                // function/class declarations, or `const f = ...` under lexical_declaration
                let mut current = node.parent();
                for _ in 0..2 {
                    match current {
                        Some(p) if p.kind() == "export_statement" => return true,
                        Some(p) => current = p.parent(),
                        None => break,
                    }
                }
                false
            }
        }
    }
}

/// `_private` is private; dunder names like `__init__` are not.
pub(crate) fn is_public_python_name(name: &str) -> bool {
    !name.starts_with('_') || (name.starts_with("__") && name.ends_with("__"))
}

fn extract_doc(node: &tree_sitter::Node, source: &str, grammar: Grammar) -> Option<String> {
    if grammar == Grammar::Python {
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0).filter(|s| s.kind() == "string")?;
        let text = node_text(&string, source);
        return clean_doc(
            text.trim_start_matches(['r', 'u', 'b', 'R', 'U', 'B'])
                .trim_matches('"')
                .trim_matches('\''),
        );
    }

    // Leading comment block; JS exports carry the comment on the export statement
    let anchor = match node.parent() {
        Some(p) if p.kind() == "export_statement" => p,
        _ => *node,
    };
    let mut lines = Vec::new();
    let mut expected_row = anchor.start_position().row;
    let mut sibling = anchor.prev_sibling();
    while let Some(prev) = sibling {
        let is_comment = prev.kind().contains("comment");
        let adjacent = prev.end_position().row + 1 >= expected_row;
        if !is_comment || !adjacent {
            break;
        }
        lines.push(node_text(&prev, source));
        expected_row = prev.start_position().row;
        sibling = prev.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let stripped: Vec<String> = lines
        .join("\n")
        .lines()
        .map(|l| {
            l.trim()
                .trim_start_matches("///")
                .trim_start_matches("//!")
                .trim_start_matches("//")
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim_start_matches('*')
                .trim()
                .to_string()
        })
        .collect();
    clean_doc(&stripped.join("\n"))
}

/// First paragraph of a doc string, bounded
fn clean_doc(raw: &str) -> Option<String> {
    let paragraph: Vec<&str> = raw
        .trim()
        .lines()
        .map(str::trim)
        .take_while(|l| !l.is_empty())
        .collect();
    let mut doc = paragraph.join(" ");
    if doc.is_empty() {
        return None;
    }
    if doc.chars().count() > 200 {
        doc = doc.chars().take(197).collect::<String>() + "...";
    }
    Some(doc)
}

/// Pass 2: attribute call sites and branches to their smallest enclosing
/// declaration, then link `called_by` for callees declared in this file.
fn resolve_declarations(
    mut declarations: Vec<Declaration>,
    call_sites: &[(usize, String)],
    branch_sites: &[usize],
) -> Vec<SemanticEntity> {
    declarations.sort_by_key(|d| (d.start_byte, std::cmp::Reverse(d.end_byte)));

    let enclosing = |declarations: &[Declaration], byte: usize| -> Option<usize> {
        declarations
            .iter()
            .enumerate()
            .filter(|(_, d)| d.start_byte <= byte && byte < d.end_byte)
            .min_by_key(|(_, d)| d.end_byte - d.start_byte)
            .map(|(i, _)| i)
    };

    for &byte in branch_sites {
        if let Some(i) = enclosing(&declarations, byte) {
            declarations[i].branches += 1;
        }
    }

    let declared: HashSet<String> = declarations.iter().map(|d| d.entity.name.clone()).collect();
    for (byte, callee) in call_sites {
        if !declared.contains(simple_name(callee)) {
            continue;
        }
        if let Some(i) = enclosing(&declarations, *byte) {
            let calls = &mut declarations[i].entity.calls;
            if !calls.contains(callee) {
                calls.push(callee.clone());
            }
        }
    }

    let mut entities: Vec<SemanticEntity> = declarations
        .into_iter()
        .map(|d| {
            let mut entity = d.entity;
            entity.complexity = 1 + d.branches;
            entity
        })
        .collect();

    link_called_by(&mut entities);
    finish_importance(&mut entities);
    entities
}

/// Last `.`-separated segment of a call target
pub(crate) fn simple_name(callee: &str) -> &str {
    callee.rsplit('.').next().unwrap_or(callee)
}

fn link_called_by(entities: &mut [SemanticEntity]) {
    let mut edges: Vec<(usize, String)> = Vec::new();
    for (caller_idx, caller) in entities.iter().enumerate() {
        for callee in &caller.calls {
            let simple = simple_name(callee);
            for (callee_idx, target) in entities.iter().enumerate() {
                if callee_idx != caller_idx && target.name == simple {
                    edges.push((callee_idx, caller.qualified_name.clone()));
                }
            }
        }
    }
    for (callee_idx, caller_name) in edges {
        let called_by = &mut entities[callee_idx].called_by;
        if !called_by.contains(&caller_name) {
            called_by.push(caller_name);
        }
    }
}

/// Classes with an initializer weigh more; in-file callers add a little.
fn finish_importance(entities: &mut [SemanticEntity]) {
    let initialized: Vec<String> = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Method && e.name == "__init__")
        .filter_map(|e| e.qualified_name.split('.').next().map(str::to_string))
        .collect();

    for entity in entities.iter_mut() {
        if entity.kind == EntityKind::Class && initialized.contains(&entity.name) {
            entity.importance = 0.9;
        }
        let bonus = (entity.called_by.len() as f64 * 0.05).min(0.15);
        entity.importance = (entity.importance + bonus).clamp(0.0, 1.0);
    }
}

// ---------------------------------------------------------------------------
// Markdown path
// ---------------------------------------------------------------------------

fn parse_markdown(source: &str) -> SemanticData {
    let line_starts = line_starts(source);
    let line_of = |offset: usize| line_starts.partition_point(|&s| s <= offset);
    let total_lines = line_starts.len();

    // (line, level, heading)
    let mut headings: Vec<(usize, u8, String)> = Vec::new();
    let mut current: Option<(usize, u8, String)> = None;

    for (event, range) in Parser::new(source).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some((line_of(range.start), heading_level_to_u8(level), String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, heading)) = current.as_mut() {
                    heading.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(heading) = current.take() {
                    headings.push(heading);
                }
            }
            _ => {}
        }
    }

    let mut entities = Vec::with_capacity(headings.len());
    for (i, (line, level, heading)) in headings.iter().enumerate() {
        let end_line = headings[i + 1..]
            .iter()
            .find(|(_, next_level, _)| next_level <= level)
            .map(|(next_line, _, _)| next_line.saturating_sub(1))
            .unwrap_or(total_lines)
            .max(*line);
        let name = heading.trim().to_string();
        if name.is_empty() {
            continue;
        }
        entities.push(SemanticEntity {
            qualified_name: name.clone(),
            name,
            kind: EntityKind::Section,
            start_line: *line,
            end_line,
            importance: EntityKind::Section.base_weight() + if *level == 1 { 0.1 } else { 0.0 },
            doc: None,
            calls: Vec::new(),
            called_by: Vec::new(),
            complexity: 1,
            is_public: true,
        });
    }

    SemanticData {
        entities,
        structural: true,
        ..SemanticData::default()
    }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Byte offsets at which each line starts
fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .filter(|&i| i < source.len() || i == 0)
        .collect()
}

// ---------------------------------------------------------------------------
// Line-pattern fallback
// ---------------------------------------------------------------------------

static CLASS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\s*)(?:export\s+)?(?:(?:public|private|protected|internal|abstract|final|static|sealed|data|open|partial)\s+)*class\s+([A-Za-z_]\w*)",
    )
    .expect("valid regex")
});

static INTERFACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:export\s+)?(?:public\s+)?(?:interface|protocol|trait)\s+([A-Za-z_]\w*)")
        .expect("valid regex")
});

static TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:export\s+)?(?:pub\s+)?(?:struct|enum|module|object|record|typedef\s+struct)\s+([A-Za-z_]\w*)")
        .expect("valid regex")
});

static FUNCTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // JavaScript-style and PHP
        r"^(\s*)(?:export\s+)?(?:(?:public|private|protected|static|async)\s+)*function\s*\*?\s*&?([A-Za-z_$][\w$]*)\s*\(",
        // Python / Ruby
        r"^(\s*)(?:async\s+)?def\s+(?:self\.)?([A-Za-z_]\w*[?!]?)",
        // Go
        r"^(\s*)func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*[\(\[]",
        // Rust
        r"^(\s*)(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)",
        // Kotlin / Swift / Scala
        r"^(\s*)(?:(?:public|private|internal|override|open|static)\s+)*(?:fun|func|def)\s+([A-Za-z_]\w*)\s*[\(\[<]",
        // Shell
        r"^(\s*)(?:function\s+)?([A-Za-z_][\w-]*)\s*\(\)\s*\{",
        // C-family: `[modifiers] Type name(args) {`
        r"^(\s*)(?:(?:public|private|protected|static|final|virtual|override|async|inline|extern|unsafe|synchronized)\s+)*[A-Za-z_][\w<>\[\],:\*&\s]*?[\s\*&]+([A-Za-z_]\w*)\s*\([^;]*\)\s*(?:const\s*)?(?:throws\s+[\w.,\s]+)?\{?\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static IMPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:import\s+(\S+)|from\s+(\S+)\s+import\s|#include\s+[<"]([^>"]+)|using\s+([\w.]+)\s*;|require(?:_once)?\s*\(?\s*['"]([^'"]+)|use\s+([\w\\:]+)\s*;)"#,
    )
    .expect("valid regex")
});

const NOT_FUNCTIONS: &[&str] = &[
    "if", "for", "while", "switch", "return", "catch", "else", "new", "sizeof", "elif", "until",
    "do", "case", "throw", "delete",
];

fn parse_with_patterns(source: &str) -> SemanticData {
    // (indent, line, name, kind)
    let mut found: Vec<(usize, usize, String, EntityKind)> = Vec::new();
    let mut imports = Vec::new();
    let mut import_lines = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;

        if let Some(caps) = IMPORT_PATTERN.captures(line) {
            if let Some(module) = caps.iter().skip(1).flatten().next() {
                imports.push(module.as_str().trim_end_matches(';').to_string());
                import_lines.push(line_no);
                continue;
            }
        }

        let matched = [
            (&*CLASS_PATTERN, EntityKind::Class),
            (&*INTERFACE_PATTERN, EntityKind::Interface),
            (&*TYPE_PATTERN, EntityKind::Type),
        ]
        .into_iter()
        .find_map(|(re, kind)| re.captures(line).map(|c| (c, kind)))
        .or_else(|| {
            FUNCTION_PATTERNS
                .iter()
                .find_map(|re| re.captures(line))
                .map(|c| (c, EntityKind::Function))
        });

        if let Some((caps, kind)) = matched {
            let indent = caps.get(1).map(|m| m.as_str().len()).unwrap_or(0);
            let Some(name) = caps.get(2).map(|m| m.as_str().to_string()) else {
                continue;
            };
            if NOT_FUNCTIONS.contains(&name.as_str()) {
                continue;
            }
            found.push((indent, line_no, name, kind));
        }
    }

    let lines: Vec<&str> = source.lines().collect();
    let last_content_line = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut entities: Vec<SemanticEntity> = Vec::with_capacity(found.len());
    for (i, (indent, line, name, kind)) in found.iter().enumerate() {
        // A declaration runs until the next one at the same or lower indentation
        let mut end_line = found[i + 1..]
            .iter()
            .find(|(next_indent, ..)| next_indent <= indent)
            .map(|(_, next_line, ..)| next_line - 1)
            .unwrap_or(last_content_line);
        while end_line > *line && lines.get(end_line - 1).is_some_and(|l| l.trim().is_empty()) {
            end_line -= 1;
        }
        let end_line = end_line.max(*line);

        // Indented functions inside a class range become methods
        let owner = entities
            .iter()
            .rev()
            .find(|e| {
                e.kind == EntityKind::Class && e.start_line < *line && *line <= e.end_line
            })
            .map(|e| e.name.clone())
            .filter(|_| *indent > 0);

        let (kind, qualified_name) = match (&owner, kind) {
            (Some(owner), EntityKind::Function) => {
                (EntityKind::Method, format!("{}.{}", owner, name))
            }
            _ => (*kind, name.clone()),
        };

        let complexity = 1 + count_branches(&lines[line - 1..end_line.min(lines.len())]);
        entities.push(SemanticEntity {
            name: name.clone(),
            qualified_name,
            kind,
            start_line: *line,
            end_line,
            importance: kind.base_weight(),
            doc: None,
            calls: Vec::new(),
            called_by: Vec::new(),
            complexity,
            is_public: !name.starts_with('_'),
        });
    }

    finish_importance(&mut entities);

    SemanticData {
        entities,
        imports,
        import_lines,
        structural: false,
        ..SemanticData::default()
    }
}

static BRANCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|elif|elsif|else\s+if|for|foreach|while|case|when|catch|except|rescue)\b|&&|\|\||\?\?")
        .expect("valid regex")
});

fn count_branches(lines: &[&str]) -> u32 {
    lines
        .iter()
        .map(|l| BRANCH_PATTERN.find_iter(l).count() as u32)
        .sum()
}

// ---------------------------------------------------------------------------
// Metrics and markers
// ---------------------------------------------------------------------------

fn is_comment_line(trimmed: &str) -> bool {
    ["#", "//", "/*", "*", "--", "<!--", "\"\"\"", "'''"]
        .iter()
        .any(|p| trimmed.starts_with(p))
        && !trimmed.starts_with("#include")
        && !trimmed.starts_with("#!")
}

fn compute_metrics(
    source: &str,
    entities: &[SemanticEntity],
    language: Option<Language>,
) -> FileMetrics {
    let mut metrics = FileMetrics::default();
    let prose = language == Some(Language::Markdown);

    for line in source.lines() {
        metrics.lines += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            metrics.blank_lines += 1;
        } else if !prose && is_comment_line(trimmed) {
            metrics.comment_lines += 1;
        } else {
            metrics.code_lines += 1;
        }
    }

    let code_entities = entities.iter().filter(|e| e.kind != EntityKind::Section);
    metrics.max_complexity = code_entities.clone().map(|e| e.complexity).max().unwrap_or(0);
    let extra: u32 = code_entities.map(|e| e.complexity.saturating_sub(1)).sum();
    metrics.complexity_score = extra as f64 / metrics.code_lines.max(1) as f64;
    metrics
}

static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:#|//|/\*|\*|--|<!--|;)\s*(TODO|FIXME|HACK|XXX|BUG|NOTE)\b[\s:(\-]*(.*)")
        .expect("valid regex")
});

/// TODO/FIXME-style comments, one per line
pub fn find_markers(source: &str) -> Vec<Marker> {
    source
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let caps = MARKER_PATTERN.captures(line)?;
            let kind = match &caps[1] {
                "TODO" => MarkerKind::Todo,
                "FIXME" => MarkerKind::Fixme,
                "HACK" => MarkerKind::Hack,
                "XXX" => MarkerKind::Xxx,
                "BUG" => MarkerKind::Bug,
                _ => MarkerKind::Note,
            };
            let mut text = caps
                .get(2)
                .map(|m| m.as_str())
                .unwrap_or("")
                .trim()
                .trim_end_matches("*/")
                .trim_end_matches("-->")
                .trim_start_matches(')')
                .trim()
                .to_string();
            if text.chars().count() > 200 {
                text = text.chars().take(200).collect();
            }
            Some(Marker {
                line: idx + 1,
                kind,
                text,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// tree-sitter helpers
// ---------------------------------------------------------------------------

fn named_children<'a>(node: &'a tree_sitter::Node) -> impl Iterator<Item = tree_sitter::Node<'a>> + 'a {
    (0..node.named_child_count()).filter_map(move |i| node.named_child(i))
}

fn find_child_by_kind<'a>(node: &'a tree_sitter::Node, kind: &str) -> Option<tree_sitter::Node<'a>> {
    (0..node.child_count())
        .filter_map(|i| node.child(i))
        .find(|child| child.kind() == kind)
}

fn find_child_text(node: &tree_sitter::Node, kind: &str, source: &str) -> Option<String> {
    find_child_by_kind(node, kind).map(|n| node_text(&n, source))
}

fn node_text(node: &tree_sitter::Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON_SOURCE: &str = r#"import os
from typing import List


class Greeter:
    """Says hello."""

    def __init__(self, name):
        self.name = name

    def greet(self):
        return format_name(self.name)

    def _secret(self):
        if self.name and os.path.exists(self.name):
            return 1
        return 0


def format_name(name):
    # TODO: handle unicode
    return name.title()


def main():
    g = Greeter("x")
    print(g.greet())
"#;

    fn entity<'a>(data: &'a SemanticData, name: &str) -> &'a SemanticEntity {
        data.entity(name).unwrap_or_else(|| panic!("missing entity {}", name))
    }

    #[test]
    fn test_python_entities_and_call_graph() {
        let data = analyze(Path::new("app/greeter.py"), PYTHON_SOURCE);
        assert!(data.structural);
        assert_eq!(data.language, Some(Language::Python));
        assert_eq!(data.imports, vec!["os".to_string(), "typing".to_string()]);
        assert_eq!(data.import_lines, vec![1, 2]);

        let class = entity(&data, "Greeter");
        assert_eq!(class.kind, EntityKind::Class);
        assert_eq!(class.doc.as_deref(), Some("Says hello."));
        assert!(class.importance >= 0.9);

        let greet = entity(&data, "Greeter.greet");
        assert_eq!(greet.kind, EntityKind::Method);
        assert!(greet.calls.contains(&"format_name".to_string()));

        let format_name = entity(&data, "format_name");
        assert_eq!(format_name.called_by, vec!["Greeter.greet".to_string()]);

        let main = entity(&data, "main");
        assert!(main.calls.contains(&"Greeter".to_string()));
        assert!(main.calls.contains(&"g.greet".to_string()));
        assert!(!main.calls.contains(&"print".to_string()));
        assert!(entity(&data, "Greeter").called_by.contains(&"main".to_string()));

        let secret = entity(&data, "Greeter._secret");
        assert!(!secret.is_public);
        assert!(secret.complexity >= 3);
        assert!(entity(&data, "Greeter.__init__").is_public);

        assert_eq!(data.markers.len(), 1);
        assert_eq!(data.markers[0].kind, MarkerKind::Todo);
        assert_eq!(data.markers[0].text, "handle unicode");
    }

    #[test]
    fn test_rust_entities() {
        let source = r#"use std::fmt;

/// A point.
pub struct Point {
    x: i32,
}

impl Point {
    pub fn new() -> Self {
        Self::origin()
    }

    fn origin() -> Self {
        Point { x: 0 }
    }
}
"#;
        let data = analyze(Path::new("src/point.rs"), source);
        let point = entity(&data, "Point");
        assert_eq!(point.kind, EntityKind::Class);
        assert!(point.is_public);
        assert_eq!(point.doc.as_deref(), Some("A point."));

        let new = entity(&data, "Point.new");
        assert_eq!(new.kind, EntityKind::Method);
        assert!(new.calls.contains(&"Self.origin".to_string()));
        assert_eq!(entity(&data, "Point.origin").called_by, vec!["Point.new".to_string()]);
        assert!(!entity(&data, "Point.origin").is_public);
        assert_eq!(data.imports, vec!["std::fmt".to_string()]);
    }

    #[test]
    fn test_typescript_entities() {
        let source = r#"import { x } from "./x";

export interface Shape {
  area(): number;
}

export class Square {
  private side = 1;
  area() {
    return helper(this.side);
  }
}

const helper = (n: number) => n * n;
"#;
        let data = analyze(Path::new("shapes.ts"), source);
        assert_eq!(entity(&data, "Shape").kind, EntityKind::Interface);
        assert!(entity(&data, "Square").is_public);
        assert_eq!(entity(&data, "Square.area").kind, EntityKind::Method);
        assert_eq!(entity(&data, "helper").called_by, vec!["Square.area".to_string()]);
        assert!(!entity(&data, "helper").is_public);
        assert_eq!(data.imports, vec!["./x".to_string()]);
    }

    #[test]
    fn test_go_entities() {
        let source = r#"package main

import "fmt"

type Server struct{}

func (s *Server) Start() {
	fmt.Println("start")
	helper()
}

func helper() {}
"#;
        let data = analyze(Path::new("main.go"), source);
        assert_eq!(entity(&data, "Server").kind, EntityKind::Class);
        let start = entity(&data, "Server.Start");
        assert!(start.is_public);
        assert_eq!(start.calls, vec!["helper".to_string()]);
        assert_eq!(entity(&data, "helper").called_by, vec!["Server.Start".to_string()]);
        assert!(!entity(&data, "helper").is_public);
    }

    #[test]
    fn test_calls_keep_only_local_declarations() {
        let source = "import os\n\n\ndef a():\n    print(1)\n    os.getcwd()\n    b()\n\n\ndef b():\n    return 2\n";
        let data = analyze(Path::new("m.py"), source);
        assert_eq!(entity(&data, "a").calls, vec!["b".to_string()]);
        assert_eq!(entity(&data, "b").called_by, vec!["a".to_string()]);
        assert!(entity(&data, "b").calls.is_empty());
    }

    #[test]
    fn test_markdown_sections() {
        let source = "# Title\n\nIntro.\n\n## Install\n\nRun it.\n\n## Usage\n\nUse it.\n";
        let data = analyze(Path::new("README.md"), source);
        let names: Vec<&str> = data.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Title", "Install", "Usage"]);
        assert_eq!(entity(&data, "Install").start_line, 5);
        assert_eq!(entity(&data, "Install").end_line, 8);
        assert_eq!(entity(&data, "Title").end_line, 11);
        assert!(data.entities.iter().all(|e| e.kind == EntityKind::Section));
    }

    #[test]
    fn test_pattern_fallback() {
        let source = r#"package demo;

import java.util.List;

public class Widget {
    public void render(int x) {
        if (x > 0) {
            draw();
        }
    }
}
"#;
        let data = analyze(Path::new("Widget.java"), source);
        assert!(!data.structural);
        assert_eq!(data.imports, vec!["java.util.List".to_string()]);
        let widget = entity(&data, "Widget");
        assert_eq!(widget.kind, EntityKind::Class);
        let render = entity(&data, "Widget.render");
        assert_eq!(render.kind, EntityKind::Method);
        assert_eq!(render.start_line, 6);
        assert!(render.complexity >= 2);
        assert!(render.calls.is_empty());
    }

    #[test]
    fn test_metrics() {
        let data = analyze(Path::new("x.py"), "# comment\n\nx = 1\n");
        assert_eq!(data.metrics.lines, 3);
        assert_eq!(data.metrics.comment_lines, 1);
        assert_eq!(data.metrics.blank_lines, 1);
        assert_eq!(data.metrics.code_lines, 1);
    }

    #[test]
    fn test_python_visibility() {
        assert!(is_public_python_name("run"));
        assert!(is_public_python_name("__init__"));
        assert!(!is_public_python_name("_helper"));
        assert!(!is_public_python_name("__mangled"));
    }
}
