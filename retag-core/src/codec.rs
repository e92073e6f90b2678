//! # Persistência do Registro
//!
//! Formato CSV com `;` como separador e `|` como separador das sublistas:
//!
//! ```text
//! KEY;TYPE;REF;GEOTYPE;VARIANTS;FILES
//! Eboracum;placeName;https://pleiades.stoa.org/places/89167;urbs;Eboraco|Eboracum;vita.xml
//! ```
//!
//! Campos que contêm `;` ou aspas são citados. A leitura é a inversa exata da escrita:
//! `load(save(R)) ≡ R` (mesmas chaves, variantes, arquivos, `ref` e `geotype`).
//!
//! Também há um snapshot JSON, que preserva a ordem de descoberta entre execuções.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};

use crate::entity::{Entity, EntityKind};
use crate::error::{FormatError, RegistryError};
use crate::registry::Registry;

/// Cabeçalho fixo do arquivo de registro
pub const HEADER: [&str; 6] = ["KEY", "TYPE", "REF", "GEOTYPE", "VARIANTS", "FILES"];
/// Separador primário
pub const DELIMITER: u8 = b';';
/// Separador das sublistas `VARIANTS` e `FILES`
pub const LIST_SEPARATOR: char = '|';

/// Converte uma entidade em registro CSV.
///
/// Falha se alguma variante ou arquivo contiver o separador secundário, pois o valor
/// seria dividido na releitura.
pub fn entity_to_record(entity: &Entity) -> Result<Vec<String>, FormatError> {
    let join = |values: &std::collections::BTreeSet<String>| -> Result<String, FormatError> {
        let mut parts = Vec::with_capacity(values.len());
        for v in values {
            let v = v.trim();
            if v.contains(LIST_SEPARATOR) {
                return Err(FormatError::Delimiter {
                    key: entity.key.clone(),
                    value: v.to_string(),
                });
            }
            if !v.is_empty() {
                parts.push(v);
            }
        }
        Ok(parts.join(&LIST_SEPARATOR.to_string()))
    };

    Ok(vec![
        entity.key.trim().to_string(),
        entity.kind.tag_name().to_string(),
        entity.reference.clone().unwrap_or_default(),
        entity.geotype.clone().unwrap_or_default(),
        join(&entity.variants)?,
        join(&entity.files)?,
    ])
}

/// Converte um registro CSV em entidade. `line` é usado apenas nas mensagens de erro.
pub fn entity_from_record(record: &StringRecord, line: u64) -> Result<Entity, FormatError> {
    if record.len() != HEADER.len() {
        return Err(FormatError::Row {
            line,
            message: format!("esperados {} campos, encontrados {}", HEADER.len(), record.len()),
        });
    }
    let field = |i: usize| record.get(i).unwrap_or("").trim();

    let key = field(0);
    if key.is_empty() {
        return Err(FormatError::Row {
            line,
            message: "chave vazia".to_string(),
        });
    }
    let kind = EntityKind::from_tag_name(field(1)).ok_or_else(|| FormatError::UnknownKind {
        line,
        kind: field(1).to_string(),
    })?;

    let mut entity = Entity::new(kind, key);
    entity.fill_reference(Some(field(2)));
    entity.fill_geotype(Some(field(3)));
    for v in field(4).split(LIST_SEPARATOR) {
        entity.add_variant(v);
    }
    for f in field(5).split(LIST_SEPARATOR) {
        entity.add_file(f);
    }
    Ok(entity)
}

/// Escreve o registro completo (cabeçalho + uma linha por entidade).
pub fn write_csv<W: Write>(registry: &Registry, writer: W) -> Result<(), FormatError> {
    let mut wtr = WriterBuilder::new()
        .delimiter(DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(writer);
    wtr.write_record(HEADER)?;
    for entity in registry.entities() {
        wtr.write_record(entity_to_record(entity)?)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Lê um registro completo. Qualquer linha inválida aborta a carga.
pub fn read_csv<R: Read>(reader: R) -> Result<Registry, FormatError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let found: Vec<&str> = headers.iter().map(str::trim).collect();
    if found != HEADER {
        return Err(FormatError::Header {
            expected: HEADER.join(";"),
            found: found.join(";"),
        });
    }

    let mut registry = Registry::new();
    for result in rdr.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        registry.insert(entity_from_record(&record, line)?);
    }
    Ok(registry)
}

/// Serializa o registro para uma `String` CSV.
pub fn to_csv_string(registry: &Registry) -> Result<String, FormatError> {
    let mut buf = Vec::new();
    write_csv(registry, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn from_csv_str(text: &str) -> Result<Registry, FormatError> {
    read_csv(text.as_bytes())
}

pub fn save_csv_path(registry: &Registry, path: impl AsRef<Path>) -> Result<(), RegistryError> {
    let file = File::create(path)?;
    write_csv(registry, BufWriter::new(file))?;
    Ok(())
}

pub fn load_csv_path(path: impl AsRef<Path>) -> Result<Registry, RegistryError> {
    let file = File::open(path)?;
    Ok(read_csv(BufReader::new(file))?)
}

pub fn to_json(registry: &Registry) -> Result<String, RegistryError> {
    Ok(serde_json::to_string_pretty(registry)?)
}

pub fn from_json(text: &str) -> Result<Registry, RegistryError> {
    Ok(serde_json::from_str(text)?)
}

/// Grava o snapshot JSON (preserva a ordem de descoberta).
pub fn save_json_path(registry: &Registry, path: impl AsRef<Path>) -> Result<(), RegistryError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), registry)?;
    Ok(())
}

pub fn load_json_path(path: impl AsRef<Path>) -> Result<Registry, RegistryError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
