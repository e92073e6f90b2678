//! # Pipeline de Reetiquetagem — Orquestrador com Eventos Observáveis
//!
//! O pipeline coordena descoberta e reinjeção e emite eventos em cada passo via um canal
//! Rust (`mpsc`), permitindo que o servidor WebSocket transmita o progresso em tempo real
//! para o cliente.

use std::sync::mpsc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::discover::{discover_with, DiscoveryReport, Mention};
use crate::error::{InjectError, StructureError};
use crate::inject::{InjectMode, InjectionReport, Injector, InjectorConfig, VariantClaim};
use crate::registry::Registry;
use crate::tei::isolate_body;

/// Resultado final de uma execução.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Discovery {
        report: DiscoveryReport,
    },
    Injection {
        document: String,
        report: InjectionReport,
    },
}

/// Eventos emitidos pelo pipeline durante o processamento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// **Passo 1**: Documento separado em cabeçalho e corpo.
    BodyIsolated { head_bytes: usize, body_bytes: usize },
    /// **Descoberta**: Uma menção foi registrada.
    EntityDiscovered { mention: Mention },
    /// **Reinjeção**: Uma variante marcou uma ou mais ocorrências.
    VariantClaimed { claim: VariantClaim },
    /// **Conclusão**: O processo terminou com sucesso.
    Done {
        outcome: PipelineOutcome,
        processing_ms: u64,
    },
    /// **Falha**: O documento foi rejeitado. O registro não foi alterado.
    Error { message: String },
}

/// O pipeline de reetiquetagem.
///
/// # Modos de Uso
/// - **Sync**: [`RetagPipeline::discover`] e [`RetagPipeline::inject`] para lotes e chamadas diretas.
/// - **Streaming**: [`RetagPipeline::discover_streaming`] e [`RetagPipeline::inject_streaming`]
///   para UIs reativas (via WebSocket).
#[derive(Debug, Clone, Default)]
pub struct RetagPipeline {
    pub config: InjectorConfig,
}

fn send_isolated(document: &str, tx: &mpsc::Sender<PipelineEvent>) {
    if let Ok((head, body)) = isolate_body(document) {
        let _ = tx.send(PipelineEvent::BodyIsolated {
            head_bytes: head.len(),
            body_bytes: body.len(),
        });
    }
}

impl RetagPipeline {
    pub fn new(config: InjectorConfig) -> Self {
        Self { config }
    }

    /// Descoberta síncrona.
    pub fn discover(
        &self,
        document: &str,
        registry: &mut Registry,
        file: Option<&str>,
    ) -> Result<DiscoveryReport, StructureError> {
        discover_with(document, registry, file, |_| {})
    }

    /// Reinjeção síncrona.
    pub fn inject(
        &self,
        document: &str,
        registry: &Registry,
        mode: InjectMode,
    ) -> Result<(String, InjectionReport), InjectError> {
        Injector::new(registry, self.config.clone()).inject(document, mode)
    }

    /// Executa a descoberta enviando eventos de progresso.
    ///
    /// # Fluxo de Eventos
    /// 1. `BodyIsolated` (quando a seção `<text>` é localizável)
    /// 2. `EntityDiscovered` (Loop): uma por menção, pessoas primeiro
    /// 3. `Done` ou `Error`
    pub fn discover_streaming(
        &self,
        document: &str,
        registry: &mut Registry,
        file: Option<&str>,
        tx: mpsc::Sender<PipelineEvent>,
    ) {
        let start = Instant::now();
        send_isolated(document, &tx);

        let result = discover_with(document, registry, file, |mention| {
            let _ = tx.send(PipelineEvent::EntityDiscovered {
                mention: mention.clone(),
            });
        });

        let _ = tx.send(match result {
            Ok(report) => PipelineEvent::Done {
                outcome: PipelineOutcome::Discovery { report },
                processing_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => PipelineEvent::Error {
                message: e.to_string(),
            },
        });
    }

    /// Executa a reinjeção enviando eventos de progresso.
    ///
    /// # Fluxo de Eventos
    /// 1. `BodyIsolated`
    /// 2. `VariantClaimed` (Loop): na ordem de substituição (mais longas primeiro)
    /// 3. `Done` com o documento reescrito, ou `Error`
    pub fn inject_streaming(
        &self,
        document: &str,
        registry: &Registry,
        mode: InjectMode,
        tx: mpsc::Sender<PipelineEvent>,
    ) {
        let start = Instant::now();
        send_isolated(document, &tx);

        let injector = Injector::new(registry, self.config.clone());
        let result = injector.inject_with(document, mode, |claim| {
            let _ = tx.send(PipelineEvent::VariantClaimed {
                claim: claim.clone(),
            });
        });

        let _ = tx.send(match result {
            Ok((document, report)) => PipelineEvent::Done {
                outcome: PipelineOutcome::Injection { document, report },
                processing_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => PipelineEvent::Error {
                message: e.to_string(),
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

    const DOC: &str = concat!(
        r#"<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader/><text><body><p>"#,
        r#"<persName key="Marcus Aurelius">Marcus</persName> Romae, "#,
        r#"<placeName key="Roma" type="urbs">Romae</placeName></p></body></text></TEI>"#
    );

    #[test]
    fn test_discover_events_streaming() {
        let pipeline = RetagPipeline::default();
        let mut registry = Registry::new();
        let (tx, rx) = mpsc::channel();
        pipeline.discover_streaming(DOC, &mut registry, Some("vita.xml"), tx);

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert!(
            matches!(&events[0], PipelineEvent::BodyIsolated { .. }),
            "Primeiro evento deve ser BodyIsolated"
        );
        let discovered: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::EntityDiscovered { mention } => Some(mention.kind),
                _ => None,
            })
            .collect();
        assert_eq!(discovered, vec![EntityKind::Person, EntityKind::Place]);
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::Done {
                outcome: PipelineOutcome::Discovery { .. },
                ..
            })
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_inject_events_streaming() {
        let pipeline = RetagPipeline::default();
        let mut registry = Registry::new();
        pipeline.discover(DOC, &mut registry, None).unwrap();

        let (tx, rx) = mpsc::channel();
        pipeline.inject_streaming(DOC, &registry, InjectMode::Replace, tx);
        let events: Vec<PipelineEvent> = rx.try_iter().collect();

        let claims = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::VariantClaimed { .. }))
            .count();
        assert_eq!(claims, 2);
        match events.last() {
            Some(PipelineEvent::Done {
                outcome: PipelineOutcome::Injection { document, report },
                ..
            }) => {
                assert_eq!(report.total_occurrences(), 3);
                assert!(document.contains(r#"<placeName key="Roma" type="urbs">Romae</placeName>, "#));
            }
            other => panic!("Último evento deve ser Done, veio {:?}", other),
        }
    }

    #[test]
    fn test_error_event_on_invalid_document() {
        let pipeline = RetagPipeline::default();
        let mut registry = Registry::new();
        let (tx, rx) = mpsc::channel();
        pipeline.discover_streaming("<TEI><teiHeader/></TEI>", &mut registry, None, tx);
        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PipelineEvent::Error { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = PipelineEvent::BodyIsolated {
            head_bytes: 3,
            body_bytes: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BodyIsolated");
        assert_eq!(json["data"]["body_bytes"], 4);
    }
}
