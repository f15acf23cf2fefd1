//! Java source parser adapter built on tree-sitter.
//!
//! Produces the entity/relation graph the indexer mirrors into the stores:
//! one entity per type, method, constructor, field and referenced
//! annotation, plus resolved relationship edges. Targets that live outside
//! the parsed file resolve to content-addressed ids and may dangle; the
//! graph layer drops such edges at write time.

use codemend_common::{CodeEntity, CoreError, EntityKind, RelationshipKind, Result};
use std::collections::HashMap;
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone)]
pub struct ParsedRelation {
    pub from_id: String,
    pub to_id: String,
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub package: Option<String>,
    pub entities: Vec<CodeEntity>,
    pub relations: Vec<ParsedRelation>,
}

pub trait SourceParser: Send + Sync {
    fn parse(&self, repo_name: &str, file_path: &str, source: &str) -> Result<ParsedFile>;
}

pub struct JavaParser;

impl JavaParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JavaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for JavaParser {
    fn parse(&self, repo_name: &str, file_path: &str, source: &str) -> Result<ParsedFile> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_java::LANGUAGE.into())
            .map_err(|e| CoreError::SourceParse {
                file: file_path.to_string(),
                message: format!("language init: {e}"),
            })?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| CoreError::SourceParse {
                file: file_path.to_string(),
                message: "tree-sitter returned no tree".to_string(),
            })?;

        let mut ctx = FileContext {
            repo_name,
            file_path,
            source,
            package: None,
            imports: HashMap::new(),
            out: ParsedFile::default(),
        };

        let root = tree.root_node();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "package_declaration" => {
                    ctx.package = first_child_of_kinds(child, &["scoped_identifier", "identifier"])
                        .map(|n| ctx.text(n));
                }
                "import_declaration" => {
                    if let Some(path) =
                        first_child_of_kinds(child, &["scoped_identifier", "identifier"])
                    {
                        let fqn = ctx.text(path);
                        if let Some(simple) = fqn.rsplit('.').next() {
                            ctx.imports.insert(simple.to_string(), fqn.clone());
                        }
                    }
                }
                "class_declaration" | "interface_declaration" | "enum_declaration" => {
                    ctx.collect_type(child, None);
                }
                _ => {}
            }
        }

        ctx.out.package = ctx.package.clone();
        Ok(ctx.out)
    }
}

struct FileContext<'a> {
    repo_name: &'a str,
    file_path: &'a str,
    source: &'a str,
    package: Option<String>,
    imports: HashMap<String, String>,
    out: ParsedFile,
}

impl<'a> FileContext<'a> {
    fn text(&self, node: Node) -> String {
        node.utf8_text(self.source.as_bytes())
            .unwrap_or_default()
            .to_string()
    }

    fn id(&self, fqn: &str, kind: EntityKind) -> String {
        CodeEntity::stable_id(self.repo_name, fqn, kind)
    }

    /// Resolve a simple type name to an fqn: imports first, then the file's
    /// own package. Unknown names resolve package-locally and may dangle.
    fn resolve(&self, name: &str) -> String {
        let bare = name
            .split('<')
            .next()
            .unwrap_or(name)
            .trim_end_matches("[]")
            .trim();
        if bare.contains('.') {
            return bare.to_string();
        }
        if let Some(fqn) = self.imports.get(bare) {
            return fqn.clone();
        }
        match &self.package {
            Some(package) => format!("{package}.{bare}"),
            None => bare.to_string(),
        }
    }

    fn qualify(&self, name: &str) -> String {
        match &self.package {
            Some(package) => format!("{package}.{name}"),
            None => name.to_string(),
        }
    }

    fn push_entity(
        &mut self,
        kind: EntityKind,
        name: &str,
        fqn: &str,
        node: Node,
        annotations: Vec<String>,
    ) -> String {
        let id = self.id(fqn, kind);
        self.out.entities.push(CodeEntity {
            id: id.clone(),
            repo_name: self.repo_name.to_string(),
            kind,
            name: name.to_string(),
            fqn: fqn.to_string(),
            file_path: self.file_path.to_string(),
            line_start: node.start_position().row as u32 + 1,
            line_end: node.end_position().row as u32 + 1,
            source: self.text(node),
            summary: javadoc_summary(node, self.source),
            annotations,
            embedding: None,
        });
        id
    }

    fn relate(&mut self, from_id: &str, to_id: &str, kind: RelationshipKind) {
        self.out.relations.push(ParsedRelation {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            kind,
        });
    }

    /// Annotation entities are created on demand, one per distinct fqn
    fn annotation_edges(&mut self, from_id: &str, annotation_names: &[String]) {
        for name in annotation_names {
            let fqn = self.resolve(name);
            let annotation_id = self.id(&fqn, EntityKind::Annotation);
            if !self.out.entities.iter().any(|e| e.id == annotation_id) {
                self.out.entities.push(CodeEntity {
                    id: annotation_id.clone(),
                    repo_name: self.repo_name.to_string(),
                    kind: EntityKind::Annotation,
                    name: name.clone(),
                    fqn: fqn.clone(),
                    file_path: self.file_path.to_string(),
                    line_start: 0,
                    line_end: 0,
                    source: format!("@{name}"),
                    summary: None,
                    annotations: vec![],
                    embedding: None,
                });
            }
            self.relate(from_id, &annotation_id, RelationshipKind::AnnotatedBy);
        }
    }

    fn collect_type(&mut self, node: Node, outer: Option<&str>) {
        let kind = match node.kind() {
            "class_declaration" => EntityKind::Class,
            "interface_declaration" => EntityKind::Interface,
            "enum_declaration" => EntityKind::Enum,
            _ => return,
        };
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let local_name = match outer {
            Some(outer) => format!("{outer}.{name}"),
            None => name.clone(),
        };
        let fqn = self.qualify(&local_name);
        let annotations = annotation_names(node, self.source);
        let type_id = self.push_entity(kind, &name, &fqn, node, annotations.clone());
        self.annotation_edges(&type_id, &annotations);

        // extends / implements
        if let Some(superclass) = first_child_of_kinds(node, &["superclass"]) {
            for super_type in type_names_in(superclass, self.source) {
                let to = self.id(&self.resolve(&super_type), EntityKind::Class);
                self.relate(&type_id, &to, RelationshipKind::Extends);
            }
        }
        for interfaces in
            children_of_kinds(node, &["super_interfaces", "extends_interfaces"])
        {
            let relation = if kind == EntityKind::Interface {
                RelationshipKind::Extends
            } else {
                RelationshipKind::Implements
            };
            for interface in type_names_in(interfaces, self.source) {
                let to = self.id(&self.resolve(&interface), EntityKind::Interface);
                self.relate(&type_id, &to, relation);
            }
        }

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };

        // enum members sit one level deeper, under enum_body_declarations
        let mut members: Vec<Node> = Vec::new();
        let mut body_cursor = body.walk();
        for member in body.named_children(&mut body_cursor) {
            if member.kind() == "enum_body_declarations" {
                let mut inner_cursor = member.walk();
                members.extend(member.named_children(&mut inner_cursor));
            } else {
                members.push(member);
            }
        }

        // first pass: declared member entities (and a same-file call map)
        let mut method_nodes: Vec<(Node, String)> = Vec::new();
        let mut local_methods: HashMap<String, String> = HashMap::new();
        for member in members {
            match member.kind() {
                "method_declaration" | "constructor_declaration" => {
                    let member_kind = if member.kind() == "constructor_declaration" {
                        EntityKind::Constructor
                    } else {
                        EntityKind::Method
                    };
                    let Some(method_name_node) = member.child_by_field_name("name") else {
                        continue;
                    };
                    let method_name = self.text(method_name_node);
                    let method_fqn = format!("{fqn}#{method_name}");
                    let method_annotations = annotation_names(member, self.source);
                    let method_id = self.push_entity(
                        member_kind,
                        &method_name,
                        &method_fqn,
                        member,
                        method_annotations.clone(),
                    );
                    self.relate(&type_id, &method_id, RelationshipKind::Declares);
                    self.annotation_edges(&method_id, &method_annotations);
                    local_methods.insert(method_name, method_id.clone());
                    method_nodes.push((member, method_id.clone()));

                    // return type
                    if member_kind == EntityKind::Method {
                        if let Some(return_type) = member.child_by_field_name("type") {
                            if let Some(type_name) = base_type_name(return_type, self.source) {
                                let to = self.id(&self.resolve(&type_name), EntityKind::Class);
                                self.relate(&method_id, &to, RelationshipKind::Returns);
                            }
                        }
                    }
                    // parameter types
                    if let Some(params) = member.child_by_field_name("parameters") {
                        let mut param_cursor = params.walk();
                        for param in params.named_children(&mut param_cursor) {
                            if param.kind() != "formal_parameter" {
                                continue;
                            }
                            if let Some(param_type) = param.child_by_field_name("type") {
                                if let Some(type_name) = base_type_name(param_type, self.source) {
                                    let to =
                                        self.id(&self.resolve(&type_name), EntityKind::Class);
                                    self.relate(&method_id, &to, RelationshipKind::Accepts);
                                }
                            }
                        }
                    }
                    // throws clause
                    if let Some(throws) = first_child_of_kinds(member, &["throws"]) {
                        for thrown in type_names_in(throws, self.source) {
                            let to = self.id(&self.resolve(&thrown), EntityKind::Class);
                            self.relate(&method_id, &to, RelationshipKind::Throws);
                        }
                    }
                }
                "field_declaration" => {
                    let field_annotations = annotation_names(member, self.source);
                    let field_type = member
                        .child_by_field_name("type")
                        .and_then(|t| base_type_name(t, self.source));
                    let mut field_cursor = member.walk();
                    for declarator in member.named_children(&mut field_cursor) {
                        if declarator.kind() != "variable_declarator" {
                            continue;
                        }
                        let Some(field_name_node) = declarator.child_by_field_name("name") else {
                            continue;
                        };
                        let field_name = self.text(field_name_node);
                        let field_fqn = format!("{fqn}#{field_name}");
                        let field_id = self.push_entity(
                            EntityKind::Field,
                            &field_name,
                            &field_fqn,
                            member,
                            field_annotations.clone(),
                        );
                        self.relate(&type_id, &field_id, RelationshipKind::Declares);
                        self.annotation_edges(&field_id, &field_annotations);

                        if let Some(type_name) = &field_type {
                            let to = self.id(&self.resolve(type_name), EntityKind::Class);
                            self.relate(&field_id, &to, RelationshipKind::TypeDependency);
                            if field_annotations
                                .iter()
                                .any(|a| matches!(a.as_str(), "Autowired" | "Inject" | "Resource"))
                            {
                                self.relate(&type_id, &to, RelationshipKind::Injects);
                            }
                        }
                    }
                }
                "class_declaration" | "interface_declaration" | "enum_declaration" => {
                    self.collect_type(member, Some(&local_name));
                }
                _ => {}
            }
        }

        // second pass: same-type call edges
        for (method_node, method_id) in method_nodes {
            if let Some(body) = method_node.child_by_field_name("body") {
                for invoked in invocation_names(body, self.source) {
                    if let Some(target_id) = local_methods.get(&invoked) {
                        if target_id != &method_id {
                            self.relate(&method_id, target_id, RelationshipKind::Calls);
                        }
                    }
                }
            }
        }
    }
}

fn first_child_of_kinds<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let result = node
        .children(&mut cursor)
        .find(|child| kinds.contains(&child.kind()));
    result
}

fn children_of_kinds<'t>(node: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|child| kinds.contains(&child.kind()))
        .collect()
}

/// All annotation names attached to a declaration's modifiers
fn annotation_names(node: Node, source: &str) -> Vec<String> {
    let Some(modifiers) = first_child_of_kinds(node, &["modifiers"]) else {
        return vec![];
    };
    let mut names = Vec::new();
    let mut cursor = modifiers.walk();
    for child in modifiers.children(&mut cursor) {
        if matches!(child.kind(), "marker_annotation" | "annotation") {
            if let Some(name) = child.child_by_field_name("name") {
                names.push(
                    name.utf8_text(source.as_bytes())
                        .unwrap_or_default()
                        .to_string(),
                );
            }
        }
    }
    names
}

/// Every type identifier inside a clause (superclass, type_list, throws)
fn type_names_in(node: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    collect_type_identifiers(node, source, &mut names);
    names
}

fn collect_type_identifiers(node: Node, source: &str, out: &mut Vec<String>) {
    if node.kind() == "type_identifier" {
        out.push(
            node.utf8_text(source.as_bytes())
                .unwrap_or_default()
                .to_string(),
        );
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_type_identifiers(child, source, out);
    }
}

/// Base type name of a (possibly generic / array) type node
fn base_type_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "void_type" | "integral_type" | "floating_point_type" | "boolean_type" => None,
        "type_identifier" => Some(
            node.utf8_text(source.as_bytes())
                .unwrap_or_default()
                .to_string(),
        ),
        _ => {
            let mut names = Vec::new();
            collect_type_identifiers(node, source, &mut names);
            names.into_iter().next()
        }
    }
}

/// Names of every method invocation under a node
fn invocation_names(node: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    collect_invocations(node, source, &mut names);
    names
}

fn collect_invocations(node: Node, source: &str, out: &mut Vec<String>) {
    if node.kind() == "method_invocation" {
        if let Some(name) = node.child_by_field_name("name") {
            out.push(
                name.utf8_text(source.as_bytes())
                    .unwrap_or_default()
                    .to_string(),
            );
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_invocations(child, source, out);
    }
}

/// First sentence of the `/** ... */` comment directly above a declaration
fn javadoc_summary(node: Node, source: &str) -> Option<String> {
    let prev = node.prev_sibling()?;
    if prev.kind() != "block_comment" {
        return None;
    }
    let text = prev.utf8_text(source.as_bytes()).ok()?;
    if !text.starts_with("/**") {
        return None;
    }
    let cleaned: String = text
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty() && !line.starts_with('@'))
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        return None;
    }
    let first_sentence = match cleaned.find(". ") {
        Some(pos) => cleaned[..=pos].trim().to_string(),
        None => cleaned,
    };
    Some(first_sentence)
}
