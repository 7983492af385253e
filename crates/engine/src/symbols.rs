use tree_sitter::{Node, Tree};

use crate::language::Language;
use crate::types::{Parameter, Position, Symbol, SymbolKind, SymbolModifiers};

/// Walk a parsed tree and collect the symbols the index tracks: functions,
/// classes and their methods, top-level variables, interfaces, enums and
/// type aliases. Nested declarations carry their enclosing scope path.
pub fn extract_symbols(language: Language, tree: &Tree, source: &str) -> Vec<Symbol> {
    let mut out = Vec::new();
    let root = tree.root_node();
    match language {
        Language::Python => walk_python(root, source, "global", &mut out),
        _ => walk_script(root, source, "global", &mut out),
    }
    out
}

fn text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn pos(point: tree_sitter::Point) -> Position {
    Position::new(point.row, point.column)
}

fn symbol(node: Node, _source: &str, name: &str, kind: SymbolKind, scope: &str) -> Symbol {
    Symbol {
        name: name.to_string(),
        kind,
        start: pos(node.start_position()),
        end: pos(node.end_position()),
        scope: scope.to_string(),
        modifiers: SymbolModifiers::default(),
        parameters: Vec::new(),
    }
}

fn field_text<'a>(node: Node<'a>, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field).map(|n| text(n, source))
}

fn has_child_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == token);
    found
}

fn accessibility(node: Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    let result = node
        .children(&mut cursor)
        .find(|c| c.kind() == "accessibility_modifier")
        .map(|c| text(c, source).to_string());
    result
}

/// Shallow parameter list: names plus explicit type annotations only.
fn extract_parameters(node: Node, source: &str) -> Vec<Parameter> {
    let Some(params) = node.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => out.push(Parameter {
                name: text(child, source).to_string(),
                type_hint: None,
            }),
            "required_parameter" | "optional_parameter" => {
                let name = child
                    .child_by_field_name("pattern")
                    .map(|n| text(n, source).to_string());
                if let Some(name) = name {
                    out.push(Parameter {
                        name,
                        type_hint: annotation_text(child, source),
                    });
                }
            }
            "assignment_pattern" | "default_parameter" => {
                if let Some(left) = child
                    .child_by_field_name("left")
                    .or_else(|| child.child_by_field_name("name"))
                {
                    out.push(Parameter {
                        name: text(left, source).to_string(),
                        type_hint: None,
                    });
                }
            }
            "typed_parameter" | "typed_default_parameter" => {
                let name = child
                    .named_child(0)
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| text(n, source).to_string());
                if let Some(name) = name {
                    out.push(Parameter {
                        name,
                        type_hint: child
                            .child_by_field_name("type")
                            .map(|t| text(t, source).trim().to_string()),
                    });
                }
            }
            _ => {}
        }
    }
    out
}

fn annotation_text(node: Node, source: &str) -> Option<String> {
    node.child_by_field_name("type").map(|t| {
        text(t, source)
            .trim_start_matches(':')
            .trim()
            .to_string()
    })
}

fn walk_script(node: Node, source: &str, scope: &str, out: &mut Vec<Symbol>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "export_statement" => walk_script(child, source, scope, out),
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    let mut sym = symbol(child, source, name, SymbolKind::Function, scope);
                    sym.modifiers.is_async = has_child_token(child, "async");
                    sym.parameters = extract_parameters(child, source);
                    out.push(sym);
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_script(body, source, name, out);
                    }
                }
            }
            "class_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    out.push(symbol(child, source, name, SymbolKind::Class, scope));
                    if let Some(body) = child.child_by_field_name("body") {
                        extract_class_members(body, source, name, out);
                    }
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut decl_cursor = child.walk();
                for declarator in child.named_children(&mut decl_cursor) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    let Some(name_node) = declarator.child_by_field_name("name") else {
                        continue;
                    };
                    // Destructuring patterns are skipped; only the outermost
                    // plain identifier is indexed.
                    if name_node.kind() == "identifier" {
                        out.push(symbol(
                            declarator,
                            source,
                            text(name_node, source),
                            SymbolKind::Variable,
                            scope,
                        ));
                    }
                }
            }
            "interface_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    out.push(symbol(child, source, name, SymbolKind::Interface, scope));
                }
            }
            "enum_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    out.push(symbol(child, source, name, SymbolKind::Enum, scope));
                }
            }
            "type_alias_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    out.push(symbol(child, source, name, SymbolKind::Type, scope));
                }
            }
            _ => walk_script(child, source, scope, out),
        }
    }
}

fn extract_class_members(body: Node, source: &str, class_name: &str, out: &mut Vec<Symbol>) {
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        match member.kind() {
            "method_definition" => {
                if let Some(name) = field_text(member, "name", source) {
                    let scope = format!("{class_name}.{name}");
                    let mut sym = symbol(member, source, name, SymbolKind::Method, &scope);
                    sym.modifiers.is_static = has_child_token(member, "static");
                    sym.modifiers.is_async = has_child_token(member, "async");
                    sym.modifiers.accessibility = accessibility(member, source);
                    sym.parameters = extract_parameters(member, source);
                    out.push(sym);
                }
            }
            "public_field_definition" | "field_definition" => {
                if let Some(name) = field_text(member, "name", source) {
                    let scope = format!("{class_name}.{name}");
                    let mut sym = symbol(member, source, name, SymbolKind::Property, &scope);
                    sym.modifiers.is_static = has_child_token(member, "static");
                    sym.modifiers.accessibility = accessibility(member, source);
                    out.push(sym);
                }
            }
            _ => {}
        }
    }
}

fn walk_python(node: Node, source: &str, scope: &str, out: &mut Vec<Symbol>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "decorated_definition" => {
                if let Some(inner) = child.child_by_field_name("definition") {
                    walk_python_definition(inner, source, scope, out);
                }
            }
            "function_definition" | "class_definition" => {
                walk_python_definition(child, source, scope, out);
            }
            "expression_statement" if scope == "global" => {
                let Some(expr) = child.named_child(0) else {
                    continue;
                };
                if expr.kind() == "assignment" {
                    if let Some(left) = expr.child_by_field_name("left") {
                        if left.kind() == "identifier" {
                            out.push(symbol(
                                expr,
                                source,
                                text(left, source),
                                SymbolKind::Variable,
                                scope,
                            ));
                        }
                    }
                }
            }
            _ => walk_python(child, source, scope, out),
        }
    }
}

fn walk_python_definition(node: Node, source: &str, scope: &str, out: &mut Vec<Symbol>) {
    match node.kind() {
        "function_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                let (kind, sym_scope) = if scope == "global" {
                    (SymbolKind::Function, scope.to_string())
                } else {
                    (SymbolKind::Method, format!("{scope}.{name}"))
                };
                let mut sym = symbol(node, source, name, kind, &sym_scope);
                sym.modifiers.is_async = has_child_token(node, "async");
                sym.parameters = extract_parameters(node, source);
                out.push(sym);
            }
        }
        "class_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(symbol(node, source, name, SymbolKind::Class, scope));
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for member in body.named_children(&mut cursor) {
                        match member.kind() {
                            "function_definition" => {
                                walk_python_definition(member, source, name, out)
                            }
                            "decorated_definition" => {
                                if let Some(inner) = member.child_by_field_name("definition") {
                                    walk_python_definition(inner, source, name, out);
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        _ => {}
    }
}
