//! # Erros do Sistema
//!
//! Três famílias de falha, cada uma com escopo bem definido:
//!
//! - [`StructureError`]: o documento não tem exatamente uma seção `<text>` ou não é XML
//!   bem formado. Aborta apenas o documento corrente.
//! - [`FormatError`]: uma linha do arquivo de registro é inválida. Aborta a carga inteira.
//! - [`InjectError`]: falhas da reinjeção (estrutura ou marcador não resolvido).
//!
//! Chaves provisórias (`[[UNKNOWN:...]]`) **não** são erros: são saída válida que
//! precisa de revisão humana.

use thiserror::Error;

use crate::markup::Marker;

/// Documento TEI com estrutura inválida.
#[derive(Debug, Error)]
pub enum StructureError {
    /// A seção procurada não aparece exatamente uma vez.
    #[error("TEI inválido: {found} seções '{section}' encontradas (esperada exatamente 1)")]
    SectionCount { section: String, found: usize },
    /// O parser XML rejeitou o documento.
    #[error("TEI inválido: XML mal formado: {0}")]
    Malformed(String),
}

impl From<quick_xml::Error> for StructureError {
    fn from(err: quick_xml::Error) -> Self {
        StructureError::Malformed(err.to_string())
    }
}

/// Linha ou cabeçalho inválido no arquivo de registro.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("cabeçalho inválido: esperado '{expected}', encontrado '{found}'")]
    Header { expected: String, found: String },
    #[error("linha {line}: {message}")]
    Row { line: u64, message: String },
    #[error("linha {line}: tipo de entidade desconhecido '{kind}'")]
    UnknownKind { line: u64, kind: String },
    /// Um valor contém o separador secundário e não sobreviveria a uma releitura.
    #[error("entidade '{key}': o valor '{value}' contém o separador '|'")]
    Delimiter { key: String, value: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Falhas de persistência em disco (CSV ou snapshot JSON).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("erro de E/S: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot JSON inválido: {0}")]
    Json(#[from] serde_json::Error),
}

/// Falhas da reinjeção de tags.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error(transparent)]
    Structure(#[from] StructureError),
    /// Um marcador sobreviveu até a remontagem: defeito interno.
    #[error("marcador não resolvido: {0}")]
    UnresolvedMarker(Marker),
}
