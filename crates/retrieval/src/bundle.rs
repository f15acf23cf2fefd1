//! Context bundle formatting for agent prompts.

use codemend_common::ContextBundle;

/// Rough estimate, 1 token ~ 4 characters
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Render the bundle for prompt injection, stopping at the token budget.
pub fn render_bundle(bundle: &ContextBundle, max_tokens: usize) -> String {
    if bundle.is_empty() {
        return String::new();
    }

    let mut rendered = String::from("# Retrieved Code Context\n\n");
    let mut spent = estimate_tokens(&rendered);

    for item in &bundle.items {
        let mut header = format!("## {} ({}", item.file_path, item.chunk_type);
        if let Some(class_name) = &item.class_name {
            header.push_str(&format!(" {class_name}"));
        }
        if let Some(method_name) = &item.method_name {
            header.push_str(&format!("#{method_name}"));
        }
        header.push_str(&format!(", score {:.2})\n", item.score));

        let block = format!("{header}```java\n{}\n```\n\n", item.content);
        let block_tokens = estimate_tokens(&block);
        if spent + block_tokens > max_tokens {
            break;
        }
        rendered.push_str(&block);
        spent += block_tokens;
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_common::{CodeContext, EntityKind};

    fn item(id: &str, content: &str) -> CodeContext {
        CodeContext {
            id: id.to_string(),
            score: 0.9,
            chunk_type: EntityKind::Method,
            class_name: Some("PaymentService".to_string()),
            method_name: Some("refund".to_string()),
            file_path: "src/main/java/com/acme/PaymentService.java".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn empty_bundle_renders_empty() {
        assert_eq!(render_bundle(&ContextBundle::default(), 1000), "");
    }

    #[test]
    fn renders_headers_and_code_blocks() {
        let bundle = ContextBundle {
            items: vec![item("a", "void refund() {}")],
        };
        let rendered = render_bundle(&bundle, 10_000);
        assert!(rendered.contains("PaymentService#refund"));
        assert!(rendered.contains("```java"));
        assert!(rendered.contains("void refund() {}"));
    }

    #[test]
    fn token_budget_truncates() {
        let bundle = ContextBundle {
            items: (0..50)
                .map(|i| item(&format!("id-{i}"), &"x".repeat(400)))
                .collect(),
        };
        let rendered = render_bundle(&bundle, 500);
        let blocks = rendered.matches("```java").count();
        assert!(blocks > 0 && blocks < 50);
    }
}
