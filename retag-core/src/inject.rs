//! # Reinjeção de Tags
//!
//! Dado um [`Registry`] e um documento TEI, reescreve o corpo para que cada ocorrência
//! de uma variante conhecida carregue a marcação canônica da sua entidade.
//!
//! ## Modos
//!
//! - [`InjectMode::Replace`]: o documento já tem tags de entidade. Todas as tags dos tipos
//!   gerenciados são removidas (o texto interno fica nu) e o texto é remarcado do zero.
//!   Idempotente: `replace(replace(d)) == replace(d)`.
//! - [`InjectMode::Add`]: só o texto ainda nu é marcado. Envoltórios sem atributos
//!   (`<persName>Marcus</persName>`) são trocados pela forma canônica; tags já com
//!   atributos ficam intactas, assim como todo o texto dentro delas.
//!
//! ## Pipeline
//!
//! 1. Proteção da marcação alheia ([`ProtectedBody::protect`])
//! 2. Remoção das tags gerenciadas (só *replace*)
//! 3. Ordenação das variantes: mais longas primeiro, depois lexicográfica
//! 4. Substituição, uma variante por vez, por marcadores novos
//! 5. Resolução dos marcadores e remontagem `cabeçalho + corpo`
//!
//! Variantes que se sobrepõem entre entidades diferentes são resolvidas apenas pela
//! ordem do passo 3: a primeira que casar fica com o texto.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{escape_text, EntityKind};
use crate::error::InjectError;
use crate::markup::{MatchPolicy, ProtectedBody};
use crate::registry::Registry;
use crate::tei::isolate_body;

/// Modo de reinjeção.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectMode {
    /// Remove as tags existentes e remarca tudo
    Replace,
    /// Marca apenas ocorrências ainda sem tag
    Add,
}

impl Default for InjectMode {
    fn default() -> Self {
        InjectMode::Replace
    }
}

/// Configuração do injetor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorConfig {
    /// Tipos gerenciados. Tags de outros tipos são protegidas como marcação alheia e
    /// entidades de outros tipos não são injetadas.
    pub kinds: Vec<EntityKind>,
    /// Renderiza entidades com chave provisória (`[[UNKNOWN:...]]`) sem o atributo `key`.
    pub omit_placeholder_keys: bool,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            kinds: EntityKind::ALL.to_vec(),
            omit_placeholder_keys: false,
        }
    }
}

/// Quantas ocorrências de uma variante foram marcadas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantClaim {
    pub variant: String,
    pub kind: EntityKind,
    pub key: String,
    pub occurrences: usize,
}

/// Resumo de uma reinjeção.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionReport {
    /// Tags gerenciadas removidas (só *replace*)
    pub stripped_tags: usize,
    /// Variantes consideradas, após filtro por tipo
    pub variants: usize,
    /// Variantes com pelo menos uma ocorrência marcada, na ordem de processamento
    pub claims: Vec<VariantClaim>,
    /// Marcadores emitidos (proteção + entidades), todos resolvidos
    pub markers: usize,
}

impl InjectionReport {
    pub fn total_occurrences(&self) -> usize {
        self.claims.iter().map(|c| c.occurrences).sum()
    }
}

/// Injetor de tags canônicas sobre um registro somente-leitura.
pub struct Injector<'r> {
    registry: &'r Registry,
    config: InjectorConfig,
}

impl<'r> Injector<'r> {
    pub fn new(registry: &'r Registry, config: InjectorConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    /// Remarca do zero um documento já etiquetado.
    pub fn replace(&self, document: &str) -> Result<String, InjectError> {
        self.inject(document, InjectMode::Replace).map(|(doc, _)| doc)
    }

    /// Marca as ocorrências ainda nuas de variantes conhecidas.
    pub fn add(&self, document: &str) -> Result<String, InjectError> {
        self.inject(document, InjectMode::Add).map(|(doc, _)| doc)
    }

    /// Executa a reinjeção e devolve o documento com o relatório.
    pub fn inject(&self, document: &str, mode: InjectMode) -> Result<(String, InjectionReport), InjectError> {
        self.inject_with(document, mode, |_| {})
    }

    /// Como [`Injector::inject`], chamando `on_claim` para cada variante que marcou algo.
    pub fn inject_with<F>(
        &self,
        document: &str,
        mode: InjectMode,
        mut on_claim: F,
    ) -> Result<(String, InjectionReport), InjectError>
    where
        F: FnMut(&VariantClaim),
    {
        let (head, body) = isolate_body(document)?;
        let mut protected = ProtectedBody::protect(body, &self.config.kinds);
        let mut report = InjectionReport::default();

        if mode == InjectMode::Replace {
            report.stripped_tags = protected.strip_managed();
        }

        let index = self.registry.variant_index(&self.config.kinds);
        let ordered = index.ordered();
        report.variants = ordered.len();
        debug!(?mode, variants = ordered.len(), "reinjeção iniciada");

        for (variant, entity) in ordered {
            let needle = escape_text(variant);
            let with_key = !(self.config.omit_placeholder_keys && entity.is_placeholder());
            let rendered = entity.render_tag(&needle, with_key);

            let occurrences = match mode {
                InjectMode::Replace => {
                    protected.claim_occurrences(&needle, &rendered, MatchPolicy::WordBounded)
                }
                InjectMode::Add => {
                    protected.claim_bare_wraps(entity.kind, &needle, &rendered)
                        + protected.claim_occurrences(&needle, &rendered, MatchPolicy::FreeText)
                }
            };

            if occurrences > 0 {
                let claim = VariantClaim {
                    variant: variant.to_string(),
                    kind: entity.kind,
                    key: entity.key.clone(),
                    occurrences,
                };
                on_claim(&claim);
                report.claims.push(claim);
            }
        }

        report.markers = protected.table().len();
        let body = protected.resolve()?;
        debug!(
            occurrences = report.total_occurrences(),
            markers = report.markers,
            "reinjeção concluída"
        );

        let mut out = String::with_capacity(head.len() + body.len());
        out.push_str(head);
        out.push_str(&body);
        Ok((out, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::error::StructureError;

    const HEAD: &str = r#"<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader><title>Marcus</title></teiHeader><text>"#;

    fn doc(body: &str) -> String {
        format!("{}{}</text></TEI>", HEAD, body)
    }

    fn person(key: &str, variants: &[&str]) -> Entity {
        let mut e = Entity::new(EntityKind::Person, key);
        for v in variants {
            e.add_variant(v);
        }
        e
    }

    fn roma() -> Entity {
        let mut e = Entity::new(EntityKind::Place, "Roma");
        e.add_variant("Romae");
        e.fill_reference(Some("https://pleiades.stoa.org/places/423025"));
        e.fill_geotype(Some("urbs"));
        e
    }

    fn registry() -> Registry {
        vec![person("Marcus Aurelius", &["Marcus"]), roma()].into_iter().collect()
    }

    #[test]
    fn test_longest_match_precedence() {
        let r: Registry = vec![person("Marcus", &[]), person("Marcus Aurelius", &[])]
            .into_iter()
            .collect();
        let out = Injector::new(&r, InjectorConfig::default())
            .add(&doc("<p>Marcus Aurelius reigned long.</p>"))
            .unwrap();
        assert_eq!(
            out,
            doc(r#"<p><persName key="Marcus Aurelius">Marcus Aurelius</persName> reigned long.</p>"#)
        );
        assert!(!out.contains(r#"key="Marcus">"#));
    }

    #[test]
    fn test_tag_syntax_preserved_in_both_modes() {
        let r: Registry = vec![person("Marcus", &[])].into_iter().collect();
        let injector = Injector::new(&r, InjectorConfig::default());
        let input = doc(r#"<p>Marcus <note ref="Marcus">text</note></p>"#);
        let expected = doc(r#"<p><persName key="Marcus">Marcus</persName> <note ref="Marcus">text</note></p>"#);
        assert_eq!(injector.add(&input).unwrap(), expected);
        assert_eq!(injector.replace(&input).unwrap(), expected);
    }

    #[test]
    fn test_head_is_untouched() {
        let r = registry();
        let out = Injector::new(&r, InjectorConfig::default())
            .replace(&doc("<p>Marcus</p>"))
            .unwrap();
        assert!(out.starts_with(HEAD));
    }

    #[test]
    fn test_replace_retags_with_current_canonical_form() {
        let r = registry();
        let input = doc(concat!(
            r#"<p><persName key="old">Marcus</persName> Aurelius et "#,
            r#"<placeName>Roma</placeName>, <hi>Marcus</hi></p>"#
        ));
        let (out, report) = Injector::new(&r, InjectorConfig::default())
            .inject(&input, InjectMode::Replace)
            .unwrap();
        assert_eq!(
            out,
            doc(concat!(
                r#"<p><persName key="Marcus Aurelius">Marcus Aurelius</persName> et "#,
                r#"<placeName key="Roma" ref="https://pleiades.stoa.org/places/423025" type="urbs">Roma</placeName>, "#,
                r#"<hi><persName key="Marcus Aurelius">Marcus</persName></hi></p>"#
            ))
        );
        assert_eq!(report.stripped_tags, 4);
        assert_eq!(report.total_occurrences(), 3);
    }

    #[test]
    fn test_replace_is_idempotent() {
        let r = registry();
        let injector = Injector::new(&r, InjectorConfig::default());
        let inputs = [
            doc(r#"<p><persName key="old">Marcus</persName> Aurelius Romae <lb/>Marcus</p>"#),
            doc("<p>Marcus, Marcusque, Roma; <!-- Marcus --> <note ref=\"Roma\">Roma</note></p>"),
            doc("<p>AveMarcus <persName>Marcus Aurelius</persName></p>"),
        ];
        for input in &inputs {
            let once = injector.replace(input).unwrap();
            let twice = injector.replace(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_add_replaces_bare_wraps_and_keeps_keyed_tags() {
        let r = registry();
        let input = doc(concat!(
            r#"<p><persName>Marcus</persName> et <persName key="Titus">Marcus</persName> "#,
            r#"in Romae</p>"#
        ));
        let out = Injector::new(&r, InjectorConfig::default()).add(&input).unwrap();
        assert_eq!(
            out,
            doc(concat!(
                r#"<p><persName key="Marcus Aurelius">Marcus</persName> et <persName key="Titus">Marcus</persName> "#,
                r#"in <placeName key="Roma" ref="https://pleiades.stoa.org/places/423025" type="urbs">Romae</placeName></p>"#
            ))
        );
    }

    #[test]
    fn test_add_leaves_text_inside_existing_tags() {
        let r: Registry = vec![person("Marcus Aurelius", &[])].into_iter().collect();
        let input = doc(concat!(
            r#"<p><persName key="Marcus Aurelius">Imperator Marcus Aurelius Augustus</persName>, "#,
            r#"Marcus Aurelius</p>"#
        ));
        let out = Injector::new(&r, InjectorConfig::default()).add(&input).unwrap();
        assert_eq!(
            out,
            doc(concat!(
                r#"<p><persName key="Marcus Aurelius">Imperator Marcus Aurelius Augustus</persName>, "#,
                r#"<persName key="Marcus Aurelius">Marcus Aurelius</persName></p>"#
            ))
        );
    }

    #[test]
    fn test_add_inside_comment_is_protected() {
        let r = registry();
        let input = doc("<p><!-- Marcus -->Roma</p>");
        let out = Injector::new(&r, InjectorConfig::default()).add(&input).unwrap();
        assert!(out.contains("<!-- Marcus -->"));
        assert!(out.contains(">Roma</placeName>"));
    }

    #[test]
    fn test_escaped_variants_match_raw_markup() {
        let r: Registry = vec![person("Castor & Pollux", &[])].into_iter().collect();
        let out = Injector::new(&r, InjectorConfig::default())
            .replace(&doc("<p>Castor &amp; Pollux</p>"))
            .unwrap();
        assert_eq!(
            out,
            doc(r#"<p><persName key="Castor &amp; Pollux">Castor &amp; Pollux</persName></p>"#)
        );
    }

    #[test]
    fn test_kinds_filter() {
        let r = registry();
        let config = InjectorConfig {
            kinds: vec![EntityKind::Place],
            ..InjectorConfig::default()
        };
        let input = doc(r#"<p><persName key="x">Marcus</persName> Roma</p>"#);
        let out = Injector::new(&r, config).replace(&input).unwrap();
        assert_eq!(
            out,
            doc(concat!(
                r#"<p><persName key="x">Marcus</persName> "#,
                r#"<placeName key="Roma" ref="https://pleiades.stoa.org/places/423025" type="urbs">Roma</placeName></p>"#
            ))
        );
    }

    #[test]
    fn test_omit_placeholder_keys() {
        let r: Registry = vec![person("[[UNKNOWN:Aurelius]]", &["Aurelius"])].into_iter().collect();
        let config = InjectorConfig {
            omit_placeholder_keys: true,
            ..InjectorConfig::default()
        };
        let out = Injector::new(&r, config).add(&doc("<p>Aurelius</p>")).unwrap();
        assert_eq!(out, doc("<p><persName>Aurelius</persName></p>"));
    }

    #[test]
    fn test_missing_body_is_structure_error() {
        let r = registry();
        let err = Injector::new(&r, InjectorConfig::default())
            .replace("<TEI><teiHeader/></TEI>")
            .unwrap_err();
        assert!(matches!(
            err,
            InjectError::Structure(StructureError::SectionCount { found: 0, .. })
        ));
    }

    #[test]
    fn test_empty_registry_leaves_document_unchanged() {
        let r = Registry::new();
        let input = doc(r#"<p>Marcus <persName key="x">Titus</persName></p>"#);
        let out = Injector::new(&r, InjectorConfig::default()).add(&input).unwrap();
        assert_eq!(out, input);
    }
}
