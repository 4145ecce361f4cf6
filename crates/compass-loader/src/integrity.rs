//! Integrity digests over definition documents.
//!
//! Digest input is the canonical JSON of the parsed document: object keys in
//! sorted order, compact separators. Formatting, comments and key order in
//! the source file therefore never affect the digest.
//!
//! Scope decides what is covered:
//!   content → everything except the `security` table
//!   full    → everything except `security.integrity.digest`

use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};

use compass_contracts::{
    agent::{DigestAlgorithm, IntegrityDeclaration, IntegrityScope},
    error::{CompassError, CompassResult},
};

use crate::schema::table_to_json;

/// Return the bytes a digest of `document` under `scope` is computed over.
pub fn canonical_bytes(document: &Value, scope: IntegrityScope) -> Vec<u8> {
    let mut doc = document.clone();
    if let Some(root) = doc.as_object_mut() {
        match scope {
            IntegrityScope::Content => {
                root.remove("security");
            }
            IntegrityScope::Full => {
                if let Some(integrity) = root
                    .get_mut("security")
                    .and_then(|s| s.get_mut("integrity"))
                    .and_then(Value::as_object_mut)
                {
                    integrity.remove("digest");
                }
            }
        }
    }
    // serde_json's default map is ordered by key and `Display` is compact.
    doc.to_string().into_bytes()
}

/// Compute a lowercase hex digest of `document`.
pub fn compute_digest(
    document: &Value,
    algorithm: DigestAlgorithm,
    scope: IntegrityScope,
) -> String {
    let bytes = canonical_bytes(document, scope);
    match algorithm {
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(&bytes)),
        DigestAlgorithm::Sha512 => hex::encode(Sha512::digest(&bytes)),
    }
}

/// Check `declaration` against the document it was read from.
pub fn verify(
    document: &Value,
    declaration: &IntegrityDeclaration,
    origin: &str,
) -> CompassResult<()> {
    let actual = compute_digest(document, declaration.algorithm, declaration.scope);
    if actual == declaration.digest {
        Ok(())
    } else {
        Err(CompassError::Integrity {
            origin: origin.to_string(),
            reason: format!(
                "declared {:?} digest does not match content (scope {:?})",
                declaration.algorithm, declaration.scope
            )
            .to_lowercase(),
        })
    }
}

/// Embed a fresh integrity declaration into TOML `source`.
///
/// Any existing declaration is replaced. The returned text is re-serialized
/// TOML, so formatting and comments from `source` are not preserved.
pub fn seal(
    source: &str,
    algorithm: DigestAlgorithm,
    scope: IntegrityScope,
) -> CompassResult<String> {
    let mut table: toml::Table = source.parse().map_err(|e: toml::de::Error| CompassError::Schema {
        origin: "<seal>".to_string(),
        reason: format!("not a valid TOML document: {}", e.message()),
    })?;

    let security = table
        .entry("security")
        .or_insert(toml::Value::Table(toml::Table::new()));
    let toml::Value::Table(security) = security else {
        return Err(CompassError::Schema {
            origin: "<seal>".to_string(),
            reason: "'security' must be a table".to_string(),
        });
    };

    let mut integrity = toml::Table::new();
    integrity.insert(
        "algorithm".to_string(),
        toml::Value::String(algorithm_name(algorithm).into()),
    );
    integrity.insert("scope".to_string(), toml::Value::String(scope_name(scope).into()));
    security.insert("integrity".to_string(), toml::Value::Table(integrity));

    let digest = compute_digest(&table_to_json(&table), algorithm, scope);
    if let Some(toml::Value::Table(security)) = table.get_mut("security") {
        if let Some(toml::Value::Table(integrity)) = security.get_mut("integrity") {
            integrity.insert("digest".to_string(), toml::Value::String(digest));
        }
    }

    toml::to_string(&table).map_err(|e| CompassError::Config {
        reason: format!("failed to serialize sealed definition: {e}"),
    })
}

fn algorithm_name(algorithm: DigestAlgorithm) -> &'static str {
    match algorithm {
        DigestAlgorithm::Sha256 => "sha256",
        DigestAlgorithm::Sha512 => "sha512",
    }
}

fn scope_name(scope: IntegrityScope) -> &'static str {
    match scope {
        IntegrityScope::Content => "content",
        IntegrityScope::Full => "full",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_order_does_not_change_digest() {
        let a = json!({ "meta": { "name": "Karim", "id": "1" }, "persona": { "tone": "dry" } });
        let b = json!({ "persona": { "tone": "dry" }, "meta": { "id": "1", "name": "Karim" } });
        assert_eq!(
            compute_digest(&a, DigestAlgorithm::Sha256, IntegrityScope::Content),
            compute_digest(&b, DigestAlgorithm::Sha256, IntegrityScope::Content),
        );
    }

    #[test]
    fn canonical_form_is_sorted_and_compact() {
        let doc = json!({
            "persona": { "tone": "dry", "role": "analyst" },
            "meta": { "tags": ["b", "a"], "name": "Karim" },
            "security": { "max_calls_per_minute": 10 },
        });
        let expected = r#"{"meta":{"name":"Karim","tags":["b","a"]},"#.to_string()
            + r#""persona":{"role":"analyst","tone":"dry"}}"#;
        assert_eq!(canonical_bytes(&doc, IntegrityScope::Content), expected.into_bytes());
    }

    #[test]
    fn content_scope_ignores_security_section() {
        let a = json!({ "meta": { "name": "Karim" }, "security": { "max_calls_per_minute": 10 } });
        let b = json!({ "meta": { "name": "Karim" }, "security": { "max_calls_per_minute": 99 } });
        assert_eq!(
            compute_digest(&a, DigestAlgorithm::Sha256, IntegrityScope::Content),
            compute_digest(&b, DigestAlgorithm::Sha256, IntegrityScope::Content),
        );
        assert_ne!(
            compute_digest(&a, DigestAlgorithm::Sha256, IntegrityScope::Full),
            compute_digest(&b, DigestAlgorithm::Sha256, IntegrityScope::Full),
        );
    }

    #[test]
    fn digest_lengths_match_algorithm() {
        let doc = json!({ "meta": {} });
        assert_eq!(compute_digest(&doc, DigestAlgorithm::Sha256, IntegrityScope::Full).len(), 64);
        assert_eq!(compute_digest(&doc, DigestAlgorithm::Sha512, IntegrityScope::Full).len(), 128);
    }

    #[test]
    fn sealed_document_verifies() {
        let source = "[meta]\nname = \"Karim\"\n\n[security]\nmax_calls_per_minute = 20\n";
        for scope in [IntegrityScope::Content, IntegrityScope::Full] {
            let sealed = seal(source, DigestAlgorithm::Sha256, scope).unwrap();
            let table: toml::Table = sealed.parse().unwrap();
            let doc = table_to_json(&table);

            let declaration = IntegrityDeclaration {
                algorithm: DigestAlgorithm::Sha256,
                digest: doc["security"]["integrity"]["digest"].as_str().unwrap().to_string(),
                scope,
            };
            assert!(verify(&doc, &declaration, "karim.toml").is_ok());
        }
    }

    #[test]
    fn mismatch_is_an_integrity_error() {
        let doc = json!({ "meta": { "name": "Karim" } });
        let declaration = IntegrityDeclaration {
            algorithm: DigestAlgorithm::Sha256,
            digest: "00".repeat(32),
            scope: IntegrityScope::Content,
        };
        let err = verify(&doc, &declaration, "karim.toml").unwrap_err();
        assert_eq!(err.code(), "integrity_error");
    }
}
