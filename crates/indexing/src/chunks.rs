//! Turning parsed entities into embeddable chunks and vector payloads.

use codemend_common::{CodeEntity, EntityKind};
use serde_json::{json, Value};

/// Enclosing type name, derived from the member fqn (`pkg.Type#member`)
pub fn class_name_of(entity: &CodeEntity) -> Option<String> {
    let type_fqn = match entity.kind {
        EntityKind::Class | EntityKind::Interface | EntityKind::Enum => entity.fqn.as_str(),
        EntityKind::Annotation => return None,
        _ => entity.fqn.split('#').next().unwrap_or(&entity.fqn),
    };
    type_fqn.rsplit('.').next().map(str::to_string)
}

/// Semantic description fed to the embedder. The raw source stays in the
/// payload; this text is what similarity search actually matches against.
pub fn build_description(entity: &CodeEntity) -> String {
    let mut description = match entity.kind {
        EntityKind::Class => format!("Java class {} ({})", entity.name, entity.fqn),
        EntityKind::Interface => format!("Java interface {} ({})", entity.name, entity.fqn),
        EntityKind::Enum => format!("Java enum {} ({})", entity.name, entity.fqn),
        EntityKind::Constructor => format!(
            "Constructor of {} ({})",
            class_name_of(entity).unwrap_or_default(),
            entity.fqn
        ),
        EntityKind::Method => format!(
            "Method {} in class {} ({})",
            entity.name,
            class_name_of(entity).unwrap_or_default(),
            entity.fqn
        ),
        EntityKind::Field => format!(
            "Field {} in class {} ({})",
            entity.name,
            class_name_of(entity).unwrap_or_default(),
            entity.fqn
        ),
        EntityKind::Annotation => format!("Annotation {} ({})", entity.name, entity.fqn),
    };

    if !entity.annotations.is_empty() {
        description.push_str(&format!(
            ". Annotated with {}",
            entity
                .annotations
                .iter()
                .map(|a| format!("@{a}"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if let Some(summary) = &entity.summary {
        description.push_str(". ");
        description.push_str(summary);
    }
    description.push_str("\n\n");
    description.push_str(&entity.source);
    description
}

/// Vector payload schema shared by indexer and retrieval engine
pub fn chunk_payload(entity: &CodeEntity) -> serde_json::Map<String, Value> {
    let mut payload = serde_json::Map::new();
    payload.insert("repo_name".to_string(), json!(entity.repo_name));
    payload.insert("file_path".to_string(), json!(entity.file_path));
    payload.insert("chunk_type".to_string(), json!(entity.kind.to_string()));
    if let Some(class_name) = class_name_of(entity) {
        payload.insert("class_name".to_string(), json!(class_name));
    }
    if matches!(entity.kind, EntityKind::Method | EntityKind::Constructor) {
        payload.insert("method_name".to_string(), json!(entity.name));
    }
    payload.insert("content".to_string(), json!(entity.source));
    payload
}
