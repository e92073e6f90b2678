//! # retag-core — Descoberta e Reinjeção de Entidades em Textos TEI
//!
//! Este crate mantém um registro de entidades nomeadas (pessoas, lugares e acidentes
//! geográficos) atestadas numa coleção de documentos XML-TEI, e usa esse registro para
//! reetiquetar os documentos de forma consistente.
//!
//! ## Arquitetura do Sistema
//!
//! O fluxo tem duas fases independentes, ligadas pelo [`Registry`]:
//!
//! 1.  **Descoberta** ([`discover`]): lê as tags `persName`/`placeName`/`geogName` de um
//!     documento e acumula chaves, variantes, arquivos, `ref` e `type` no registro.
//! 2.  **Persistência** ([`codec`]): o registro vai para um CSV editável à mão (`;` e `|`)
//!     ou para um snapshot JSON, e volta sem perdas.
//! 3.  **Reinjeção** ([`inject`]): com o registro revisado, cada ocorrência de variante
//!     conhecida no corpo recebe a tag canônica, sem tocar na marcação alheia
//!     ([`markup`]).
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use retag_core::{discover, InjectMode, Injector, InjectorConfig, Registry};
//!
//! let doc = r#"<TEI><teiHeader/><text><p><persName key="Marcus Aurelius">Marcus</persName> et Marcus</p></text></TEI>"#;
//!
//! let mut registry = Registry::new();
//! discover(doc, &mut registry, Some("vita.xml")).unwrap();
//!
//! let injector = Injector::new(&registry, InjectorConfig::default());
//! let (out, _) = injector.inject(doc, InjectMode::Replace).unwrap();
//! assert!(out.contains(r#"et <persName key="Marcus Aurelius">Marcus</persName>"#));
//! ```
//!
//! ## Módulos Principais
//!
//! - [`tei`]: isolamento do corpo, parse e travessia da árvore.
//! - [`entity`] / [`registry`]: modelo de dados e índice de variantes.
//! - [`pipeline`]: orquestrador com eventos observáveis.
//! - [`gazetteer`]: coordenadas para referências Pleiades e GeoNames.

pub mod codec;
pub mod discover;
pub mod entity;
pub mod error;
pub mod gazetteer;
pub mod inject;
pub mod markup;
pub mod pipeline;
pub mod registry;
pub mod tei;

pub use discover::{discover, DiscoveryReport, Mention};
pub use entity::{Entity, EntityId, EntityKind};
pub use error::{FormatError, InjectError, RegistryError, StructureError};
pub use gazetteer::{place_report, AuthorityRef, Gazetteer, MemoryGazetteer, PlaceRow};
pub use inject::{InjectMode, InjectionReport, Injector, InjectorConfig, VariantClaim};
pub use pipeline::{PipelineEvent, PipelineOutcome, RetagPipeline};
pub use registry::{Registry, VariantConflict};
