use std::path::{Component, Path, PathBuf};

use tree_sitter::{Node, Tree};

use crate::language::Language;

/// One import statement: the raw specifier plus the names it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpec {
    pub source: String,
    pub names: Vec<String>,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FileImports {
    pub imports: Vec<ImportSpec>,
    pub exports: Vec<String>,
}

pub fn extract_imports(language: Language, tree: &Tree, source: &str) -> FileImports {
    let mut out = FileImports::default();
    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match language {
            Language::Python => collect_python(child, source, &mut out),
            _ => collect_script(child, source, &mut out),
        }
    }
    out
}

fn text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn strip_quotes(raw: &str) -> String {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

fn collect_script(node: Node, source: &str, out: &mut FileImports) {
    match node.kind() {
        "import_statement" => {
            let Some(source_node) = node.child_by_field_name("source") else {
                return;
            };
            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "import_clause" {
                    collect_import_names(child, source, &mut names);
                }
            }
            out.imports.push(ImportSpec {
                source: strip_quotes(text(source_node, source)),
                names,
                line: node.start_position().row,
            });
        }
        "export_statement" => {
            if let Some(decl) = node.child_by_field_name("declaration") {
                if let Some(name) = decl
                    .child_by_field_name("name")
                    .map(|n| text(n, source).to_string())
                {
                    out.exports.push(name);
                } else if matches!(decl.kind(), "lexical_declaration" | "variable_declaration") {
                    let mut cursor = decl.walk();
                    for declarator in decl.named_children(&mut cursor) {
                        if declarator.kind() == "variable_declarator" {
                            if let Some(name) = declarator.child_by_field_name("name") {
                                if name.kind() == "identifier" {
                                    out.exports.push(text(name, source).to_string());
                                }
                            }
                        }
                    }
                }
            }
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "export_clause" {
                    let mut spec_cursor = child.walk();
                    for spec in child.named_children(&mut spec_cursor) {
                        if spec.kind() == "export_specifier" {
                            if let Some(name) = spec.child_by_field_name("name") {
                                out.exports.push(text(name, source).to_string());
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn collect_import_names(clause: Node, source: &str, names: &mut Vec<String>) {
    let mut cursor = clause.walk();
    for child in clause.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => names.push(text(child, source).to_string()),
            "named_imports" => {
                let mut spec_cursor = child.walk();
                for spec in child.named_children(&mut spec_cursor) {
                    if spec.kind() == "import_specifier" {
                        let name = spec
                            .child_by_field_name("alias")
                            .or_else(|| spec.child_by_field_name("name"));
                        if let Some(name) = name {
                            names.push(text(name, source).to_string());
                        }
                    }
                }
            }
            "namespace_import" => {
                let mut ns_cursor = child.walk();
                for inner in child.named_children(&mut ns_cursor) {
                    if inner.kind() == "identifier" {
                        names.push(text(inner, source).to_string());
                    }
                }
            }
            _ => {}
        }
    }
}

fn collect_python(node: Node, source: &str, out: &mut FileImports) {
    if node.kind() != "import_from_statement" {
        return;
    }
    let Some(module) = node.child_by_field_name("module_name") else {
        return;
    };
    let raw = text(module, source);
    if !raw.starts_with('.') {
        return;
    }
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "dotted_name" && Some(child) != node.child_by_field_name("module_name") {
            names.push(text(child, source).to_string());
        }
        if child.kind() == "aliased_import" {
            if let Some(name) = child.child_by_field_name("name") {
                names.push(text(name, source).to_string());
            }
        }
    }
    out.imports.push(ImportSpec {
        source: raw.to_string(),
        names,
        line: node.start_position().row,
    });
}

const SCRIPT_EXTENSIONS: [&str; 5] = ["ts", "tsx", "js", "jsx", "json"];

/// Resolve a relative import against the importing file's directory.
/// Candidates in order: the exact path, the path plus each known extension,
/// then `<path>/index.<ext>`. Non-relative specifiers resolve to nothing.
pub fn resolve_relative(importing_file: &Path, spec: &str) -> Option<PathBuf> {
    if !spec.starts_with('.') {
        return None;
    }
    let dir = importing_file.parent()?;

    if let Some(rest) = python_relative(spec) {
        return resolve_python(dir, &rest);
    }

    let base = normalize_path(&dir.join(spec));

    if base.is_file() {
        return Some(base);
    }
    for ext in SCRIPT_EXTENSIONS {
        let candidate = PathBuf::from(format!("{}.{ext}", base.display()));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    if base.is_dir() {
        for ext in SCRIPT_EXTENSIONS {
            let candidate = base.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// `.util` / `..pkg.mod` style specifiers (no slash, dot-separated module path).
fn python_relative(spec: &str) -> Option<(usize, Vec<String>)> {
    if spec.contains('/') {
        return None;
    }
    let dots = spec.chars().take_while(|c| *c == '.').count();
    let rest = &spec[dots..];
    if rest.is_empty() || rest.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '.') {
        return None;
    }
    // "./foo"-style specifiers never reach here (slash check above); a single
    // leading dot with a bare module name is the Python form.
    Some((dots, rest.split('.').map(str::to_string).collect()))
}

fn resolve_python(dir: &Path, (dots, parts): &(usize, Vec<String>)) -> Option<PathBuf> {
    let mut base = dir.to_path_buf();
    for _ in 1..*dots {
        base = base.parent()?.to_path_buf();
    }
    for part in parts {
        base = base.join(part);
    }
    let module = PathBuf::from(format!("{}.py", base.display()));
    if module.is_file() {
        return Some(normalize_path(&module));
    }
    let package = base.join("__init__.py");
    if package.is_file() {
        return Some(normalize_path(&package));
    }
    None
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem, so unresolved candidates still compare cleanly.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
