//! # Descoberta de Entidades
//!
//! Percorre a seção `<text>` de um documento TEI e registra cada menção etiquetada
//! (`persName`, `placeName`, `geogName`) no [`Registry`].
//!
//! ## Ordem de processamento
//!
//! Os tipos são processados na ordem de [`EntityKind::ALL`]: primeiro todas as pessoas,
//! depois os lugares, depois os acidentes geográficos. Dentro de um tipo, os nós seguem a
//! ordem do documento. A ordem importa porque o dicionário de trabalho
//! (`variante → entidade`) é atualizado a cada menção e consultado pelas menções sem chave.
//!
//! ## Menções sem chave
//!
//! Uma menção sem atributo `key` é resolvida pelo dicionário de trabalho. Se o texto nunca
//! foi visto, uma chave provisória `[[UNKNOWN:texto]]` é sintetizada; menções seguintes
//! com o mesmo texto caem na mesma entidade.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{placeholder_key, EntityId, EntityKind};
use crate::error::StructureError;
use crate::registry::Registry;
use crate::tei::{find_nodes, find_single_node, flatten_text, parse_document, Element, BODY_SECTION};

/// Uma menção processada pelo descobridor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub kind: EntityKind,
    /// Chave da entidade que recebeu a menção
    pub key: String,
    /// Texto achatado do nó
    pub variant: String,
    /// A entidade foi criada por esta menção
    pub created: bool,
    /// A chave foi sintetizada por esta menção
    pub placeholder: bool,
}

/// Resumo de uma passada de descoberta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub file: Option<String>,
    /// Nós de entidade visitados
    pub nodes: usize,
    /// Entidades novas no registro
    pub created: usize,
    /// Chaves provisórias sintetizadas
    pub placeholders: usize,
    /// Nós sem chave e sem texto, ignorados
    pub skipped: usize,
}

/// Dicionário de trabalho `variante → entidade`, semeado com o registro.
///
/// As entidades são semeadas na ordem de descoberta, cada uma com a chave e depois as
/// variantes; a primeira que reivindica uma forma fica com ela. Durante a passada, cada
/// menção sobrescreve a entrada da sua variante.
fn seed_vardict(registry: &Registry) -> HashMap<String, EntityId> {
    let mut vardict = HashMap::new();
    for entity in registry.entities() {
        vardict.entry(entity.key.clone()).or_insert_with(|| entity.id());
        for variant in &entity.variants {
            vardict.entry(variant.clone()).or_insert_with(|| entity.id());
        }
    }
    vardict
}

fn attr_value<'a>(node: &'a Element, name: &str) -> Option<&'a str> {
    node.attr(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Registra todas as menções etiquetadas do documento.
///
/// `file` identifica o documento na lista `files` das entidades.
///
/// # Erros
/// [`StructureError`] se o documento não for XML bem formado ou não tiver exatamente
/// uma seção `<text>` sob a raiz. Nesse caso o registro não é alterado.
pub fn discover(
    document: &str,
    registry: &mut Registry,
    file: Option<&str>,
) -> Result<DiscoveryReport, StructureError> {
    discover_with(document, registry, file, |_| {})
}

/// Como [`discover`], chamando `on_mention` para cada menção registrada.
pub fn discover_with<F>(
    document: &str,
    registry: &mut Registry,
    file: Option<&str>,
    mut on_mention: F,
) -> Result<DiscoveryReport, StructureError>
where
    F: FnMut(&Mention),
{
    let root = parse_document(document)?;
    let text = find_single_node(BODY_SECTION, &root)?;

    let mut vardict = seed_vardict(registry);
    let mut report = DiscoveryReport {
        file: file.map(str::to_string),
        ..DiscoveryReport::default()
    };

    for kind in EntityKind::ALL {
        for node in find_nodes(kind.tag_name(), text) {
            report.nodes += 1;
            let variant = flatten_text(node);

            let (id, placeholder): (EntityId, bool) = match attr_value(node, "key") {
                Some(key) => ((kind, key.to_string()), false),
                None if variant.is_empty() => {
                    report.skipped += 1;
                    continue;
                }
                None => match vardict.get(&variant) {
                    Some(id) => (id.clone(), false),
                    None => {
                        let key = placeholder_key(&variant);
                        debug!(%kind, %variant, %key, "chave provisória sintetizada");
                        ((kind, key), true)
                    }
                },
            };

            let (entity, created) = registry.get_or_create(id.0, &id.1);
            entity.add_variant(&variant);
            if let Some(f) = file {
                entity.add_file(f);
            }
            entity.fill_reference(attr_value(node, "ref"));
            entity.fill_geotype(attr_value(node, "type"));

            if created {
                report.created += 1;
            }
            if placeholder {
                report.placeholders += 1;
            }
            on_mention(&Mention {
                kind: entity.kind,
                key: entity.key.clone(),
                variant: variant.clone(),
                created,
                placeholder,
            });

            vardict.insert(variant, (entity.kind, entity.key.clone()));
        }
    }

    debug!(
        file = file.unwrap_or("-"),
        nodes = report.nodes,
        created = report.created,
        placeholders = report.placeholders,
        "descoberta concluída"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn doc(body: &str) -> String {
        format!(
            r#"<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader><title>t</title></teiHeader><text><body>{}</body></text></TEI>"#,
            body
        )
    }

    #[test]
    fn test_persons_before_places() {
        let d = doc(concat!(
            r#"<p><persName key="Iohannes">Frater Iohannes de "#,
            r#"<placeName key="Eboracum" ref="https://pleiades.stoa.org/places/89167" type="urbs">Eboraco</placeName>"#,
            r#"</persName> venit. <placeName>Eboraco</placeName></p>"#
        ));
        let mut r = Registry::new();
        let report = discover(&d, &mut r, Some("vita.xml")).unwrap();
        assert_eq!(report.nodes, 3);
        assert_eq!(report.created, 2);
        assert_eq!(report.placeholders, 0);

        let keys: Vec<_> = r.entities().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["Iohannes", "Eboracum"]);

        let iohannes = r.get(EntityKind::Person, "Iohannes").unwrap();
        assert!(iohannes.variants.contains("Frater Iohannes de Eboraco"));
        assert_eq!(iohannes.geotype, None);

        let eboracum = r.get(EntityKind::Place, "Eboracum").unwrap();
        assert_eq!(eboracum.variants.len(), 2);
        assert_eq!(eboracum.geotype.as_deref(), Some("urbs"));
        assert!(eboracum.files.contains("vita.xml"));
    }

    #[test]
    fn test_unkeyed_mentions_share_placeholder() {
        let d = doc("<p><persName>Aurelius</persName> et <persName> Aurelius </persName></p>");
        let mut r = Registry::new();
        let report = discover(&d, &mut r, None).unwrap();
        assert_eq!(report.placeholders, 1);
        assert_eq!(r.len(), 1);

        let e = r.get(EntityKind::Person, "[[UNKNOWN:Aurelius]]").unwrap();
        assert!(e.is_placeholder());
        assert!(e.variants.contains("Aurelius"));
        assert!(e.files.is_empty());
    }

    #[test]
    fn test_unkeyed_mention_resolves_to_known_variant() {
        let mut seeded = Entity::new(EntityKind::Person, "Marcus Aurelius");
        seeded.add_variant("Marcus");
        let mut r: Registry = vec![seeded].into_iter().collect();

        let d = doc("<p><persName>Marcus</persName></p>");
        let mut mentions = Vec::new();
        discover_with(&d, &mut r, Some("b.xml"), |m| mentions.push(m.clone())).unwrap();

        assert_eq!(r.len(), 1);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].key, "Marcus Aurelius");
        assert!(!mentions[0].created);
        assert!(r
            .get(EntityKind::Person, "Marcus Aurelius")
            .unwrap()
            .files
            .contains("b.xml"));
    }

    #[test]
    fn test_seed_follows_discovery_order() {
        let mut aurelius = Entity::new(EntityKind::Person, "Marcus Aurelius");
        aurelius.add_variant("Antoninus");
        let antoninus = Entity::new(EntityKind::Person, "Antoninus");
        let mut r: Registry = vec![aurelius, antoninus].into_iter().collect();

        let d = doc("<p><persName>Antoninus</persName></p>");
        let mut mentions = Vec::new();
        discover_with(&d, &mut r, None, |m| mentions.push(m.key.clone())).unwrap();
        assert_eq!(mentions, vec!["Marcus Aurelius".to_string()]);
    }

    #[test]
    fn test_first_reference_wins() {
        let d = doc(concat!(
            r#"<p><placeName key="Roma" ref="https://pleiades.stoa.org/places/423025">Roma</placeName>"#,
            r#"<placeName key="Roma" ref="https://www.geonames.org/3169070" type="urbs">Romae</placeName></p>"#
        ));
        let mut r = Registry::new();
        discover(&d, &mut r, None).unwrap();
        let roma = r.get(EntityKind::Place, "Roma").unwrap();
        assert_eq!(roma.reference.as_deref(), Some("https://pleiades.stoa.org/places/423025"));
        assert_eq!(roma.geotype.as_deref(), Some("urbs"));
    }

    #[test]
    fn test_empty_unkeyed_nodes_are_skipped() {
        let d = doc("<p><persName/><geogName key=\"Tamesis\"/></p>");
        let mut r = Registry::new();
        let report = discover(&d, &mut r, None).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(r.len(), 1);
        assert!(r.contains(EntityKind::Geographic, "Tamesis"));
    }

    #[test]
    fn test_separate_discovery_then_merge_matches_sequential() {
        let d1 = doc(r#"<p><persName key="Marcus">Marco</persName> <placeName key="Roma">Romae</placeName></p>"#);
        let d2 = doc(r#"<p><persName key="Marcus">Marcum</persName> <persName key="Titus">Titus</persName></p>"#);

        let mut a = Registry::new();
        discover(&d1, &mut a, Some("d1")).unwrap();
        let mut b = Registry::new();
        discover(&d2, &mut b, Some("d2")).unwrap();
        a.merge(b);

        let mut sequential = Registry::new();
        discover(&d1, &mut sequential, Some("d1")).unwrap();
        discover(&d2, &mut sequential, Some("d2")).unwrap();

        assert_eq!(a.len(), sequential.len());
        for entity in sequential.entities() {
            assert_eq!(a.get(entity.kind, &entity.key), Some(entity));
        }
    }

    #[test]
    fn test_separate_discovery_then_merge_matches_single_pass() {
        let body1 = r#"<p><persName key="Marcus">Marco</persName> <placeName key="Roma" type="urbs">Romae</placeName></p>"#;
        let body2 = r#"<p><persName key="Marcus">Marcum</persName> <geogName key="Tamesis">Tamesis</geogName> <placeName key="Roma">Roma</placeName></p>"#;

        let mut a = Registry::new();
        discover(&doc(body1), &mut a, Some("colecao.xml")).unwrap();
        let mut b = Registry::new();
        discover(&doc(body2), &mut b, Some("colecao.xml")).unwrap();
        a.merge(b);

        let mut single = Registry::new();
        discover(&doc(&format!("{}{}", body1, body2)), &mut single, Some("colecao.xml")).unwrap();

        assert_eq!(a.len(), single.len());
        for entity in single.entities() {
            let merged = a.get(entity.kind, &entity.key).unwrap();
            assert_eq!(merged.variants, entity.variants);
            assert_eq!(merged.files, entity.files);
        }
    }

    #[test]
    fn test_structure_errors_leave_registry_untouched() {
        let mut r = Registry::new();
        let malformed = discover("<TEI><text><persName key=\"x\">x</text></TEI>", &mut r, None);
        assert!(matches!(malformed, Err(StructureError::Malformed(_))));

        let no_body = discover("<TEI><teiHeader/></TEI>", &mut r, None);
        assert!(matches!(no_body, Err(StructureError::SectionCount { found: 0, .. })));
        assert!(r.is_empty());
    }
}
