use codemend_common::{CodeEntity, EntityKind, RelationshipKind};
use codemend_indexing::{JavaParser, SourceParser};

const PAYMENT_SERVICE: &str = r#"
package com.acme.payments;

import com.acme.billing.Invoice;
import org.springframework.beans.factory.annotation.Autowired;
import org.springframework.stereotype.Service;

/**
 * Handles payment capture and refunds. Delegates persistence to the
 * repository layer.
 */
@Service
public class PaymentService extends BaseService implements AuditAware {

    @Autowired
    private PaymentRepository repository;

    private Invoice lastInvoice;

    /** Captures a payment. */
    public Receipt capture(PaymentRequest request) throws PaymentException {
        validate(request);
        return repository.save(request);
    }

    public void validate(PaymentRequest request) {
    }
}
"#;

fn parse(source: &str) -> codemend_indexing::ParsedFile {
    JavaParser::new()
        .parse("github.com/acme/shop@main", "src/main/java/com/acme/payments/PaymentService.java", source)
        .unwrap()
}

fn find<'a>(
    parsed: &'a codemend_indexing::ParsedFile,
    kind: EntityKind,
    name: &str,
) -> &'a CodeEntity {
    parsed
        .entities
        .iter()
        .find(|e| e.kind == kind && e.name == name)
        .unwrap_or_else(|| panic!("missing {kind:?} {name}"))
}

#[test]
fn parses_class_with_package_and_fqn() {
    let parsed = parse(PAYMENT_SERVICE);
    assert_eq!(parsed.package.as_deref(), Some("com.acme.payments"));

    let class = find(&parsed, EntityKind::Class, "PaymentService");
    assert_eq!(class.fqn, "com.acme.payments.PaymentService");
    assert!(class.annotations.contains(&"Service".to_string()));
    assert!(class
        .summary
        .as_deref()
        .unwrap()
        .starts_with("Handles payment capture and refunds."));
}

#[test]
fn members_get_declares_edges_from_their_type() {
    let parsed = parse(PAYMENT_SERVICE);
    let class = find(&parsed, EntityKind::Class, "PaymentService");
    let capture = find(&parsed, EntityKind::Method, "capture");
    let repository_field = find(&parsed, EntityKind::Field, "repository");

    for member_id in [&capture.id, &repository_field.id] {
        assert!(
            parsed.relations.iter().any(|r| r.kind == RelationshipKind::Declares
                && r.from_id == class.id
                && &r.to_id == member_id),
            "missing DECLARES edge"
        );
    }
}

#[test]
fn method_fqns_use_member_separator() {
    let parsed = parse(PAYMENT_SERVICE);
    let capture = find(&parsed, EntityKind::Method, "capture");
    assert_eq!(capture.fqn, "com.acme.payments.PaymentService#capture");
    assert_eq!(capture.summary.as_deref(), Some("Captures a payment."));
}

#[test]
fn extends_and_implements_edges_resolved_package_locally() {
    let parsed = parse(PAYMENT_SERVICE);
    let class = find(&parsed, EntityKind::Class, "PaymentService");

    let base_id = CodeEntity::stable_id(
        "github.com/acme/shop@main",
        "com.acme.payments.BaseService",
        EntityKind::Class,
    );
    let audit_id = CodeEntity::stable_id(
        "github.com/acme/shop@main",
        "com.acme.payments.AuditAware",
        EntityKind::Interface,
    );

    assert!(parsed.relations.iter().any(
        |r| r.kind == RelationshipKind::Extends && r.from_id == class.id && r.to_id == base_id
    ));
    assert!(parsed.relations.iter().any(
        |r| r.kind == RelationshipKind::Implements && r.from_id == class.id && r.to_id == audit_id
    ));
}

#[test]
fn annotations_become_entities_with_edges() {
    let parsed = parse(PAYMENT_SERVICE);
    let class = find(&parsed, EntityKind::Class, "PaymentService");
    let service_annotation = find(&parsed, EntityKind::Annotation, "Service");

    // import-resolved fqn
    assert_eq!(service_annotation.fqn, "org.springframework.stereotype.Service");
    assert!(parsed.relations.iter().any(|r| r.kind == RelationshipKind::AnnotatedBy
        && r.from_id == class.id
        && r.to_id == service_annotation.id));
}

#[test]
fn autowired_field_produces_injects_edge() {
    let parsed = parse(PAYMENT_SERVICE);
    let class = find(&parsed, EntityKind::Class, "PaymentService");
    let repository_type_id = CodeEntity::stable_id(
        "github.com/acme/shop@main",
        "com.acme.payments.PaymentRepository",
        EntityKind::Class,
    );

    assert!(parsed.relations.iter().any(|r| r.kind == RelationshipKind::Injects
        && r.from_id == class.id
        && r.to_id == repository_type_id));
}

#[test]
fn same_type_calls_are_linked() {
    let parsed = parse(PAYMENT_SERVICE);
    let capture = find(&parsed, EntityKind::Method, "capture");
    let validate = find(&parsed, EntityKind::Method, "validate");

    assert!(parsed.relations.iter().any(|r| r.kind == RelationshipKind::Calls
        && r.from_id == capture.id
        && r.to_id == validate.id));
}

#[test]
fn throws_and_returns_and_accepts_edges() {
    let parsed = parse(PAYMENT_SERVICE);
    let capture = find(&parsed, EntityKind::Method, "capture");

    let receipt = CodeEntity::stable_id(
        "github.com/acme/shop@main",
        "com.acme.payments.Receipt",
        EntityKind::Class,
    );
    let request = CodeEntity::stable_id(
        "github.com/acme/shop@main",
        "com.acme.payments.PaymentRequest",
        EntityKind::Class,
    );
    let exception = CodeEntity::stable_id(
        "github.com/acme/shop@main",
        "com.acme.payments.PaymentException",
        EntityKind::Class,
    );

    assert!(parsed.relations.iter().any(
        |r| r.kind == RelationshipKind::Returns && r.from_id == capture.id && r.to_id == receipt
    ));
    assert!(parsed.relations.iter().any(
        |r| r.kind == RelationshipKind::Accepts && r.from_id == capture.id && r.to_id == request
    ));
    assert!(parsed.relations.iter().any(
        |r| r.kind == RelationshipKind::Throws && r.from_id == capture.id && r.to_id == exception
    ));
}

#[test]
fn imported_field_type_resolves_through_import() {
    let parsed = parse(PAYMENT_SERVICE);
    let invoice_field = find(&parsed, EntityKind::Field, "lastInvoice");
    let invoice_type_id = CodeEntity::stable_id(
        "github.com/acme/shop@main",
        "com.acme.billing.Invoice",
        EntityKind::Class,
    );

    assert!(parsed.relations.iter().any(|r| r.kind == RelationshipKind::TypeDependency
        && r.from_id == invoice_field.id
        && r.to_id == invoice_type_id));
}

#[test]
fn interface_and_enum_declarations_parse() {
    let source = r#"
package com.acme;

public interface Auditable extends Comparable {
    void audit();
}
"#;
    let parsed = JavaParser::new()
        .parse("repo", "src/main/java/com/acme/Auditable.java", source)
        .unwrap();
    let interface = find(&parsed, EntityKind::Interface, "Auditable");
    assert_eq!(interface.fqn, "com.acme.Auditable");
    assert!(parsed
        .entities
        .iter()
        .any(|e| e.kind == EntityKind::Method && e.name == "audit"));

    let enum_source = r#"
package com.acme;

public enum Status {
    ACTIVE, CLOSED;

    public boolean open() {
        return this == ACTIVE;
    }
}
"#;
    let parsed = JavaParser::new()
        .parse("repo", "src/main/java/com/acme/Status.java", enum_source)
        .unwrap();
    assert!(parsed
        .entities
        .iter()
        .any(|e| e.kind == EntityKind::Enum && e.name == "Status"));
    assert!(parsed
        .entities
        .iter()
        .any(|e| e.kind == EntityKind::Method && e.name == "open"));
}

#[test]
fn empty_source_yields_no_entities() {
    let parsed = JavaParser::new()
        .parse("repo", "src/main/java/Empty.java", "")
        .unwrap();
    assert!(parsed.entities.is_empty());
    assert!(parsed.relations.is_empty());
}
