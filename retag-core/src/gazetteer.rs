//! # Gazetteer
//!
//! Resolução de coordenadas para lugares cujo `ref` aponta para uma autoridade conhecida:
//!
//! | Autoridade | URI                                        | Fonte local                       |
//! |------------|--------------------------------------------|-----------------------------------|
//! | Pleiades   | `https://pleiades.stoa.org/places/<id>`    | CSV `id,title,reprLat,reprLong`   |
//! | GeoNames   | `https://www.geonames.org/<id>`            | dump TSV (colunas 0, 1, 4, 5)     |
//!
//! O gazetteer é opcional: sem ele (ou sem a linha correspondente) o relatório de lugares
//! simplesmente omite as coordenadas.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;

use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::EntityKind;
use crate::error::{FormatError, RegistryError};
use crate::registry::Registry;

pub const PLEIADES_URL_BASE: &str = "https://pleiades.stoa.org/places/";
pub const GEONAMES_URL_BASE: &str = "https://www.geonames.org/";

/// Referência a um registro de autoridade geográfica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "authority", content = "id", rename_all = "lowercase")]
pub enum AuthorityRef {
    Pleiades(u64),
    GeoNames(u64),
}

fn authority_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(?:(pleiades)\.stoa\.org/places|(?:www\.)?(geonames)\.org)/(\d+)(?:[/?#].*)?$")
            .expect("regex de autoridade válida")
    })
}

impl AuthorityRef {
    /// Reconhece uma URI de autoridade. O identificador é o número antes da primeira `/`
    /// após a base (`.../places/89167/eboracum` → 89167).
    pub fn parse(reference: &str) -> Option<Self> {
        let caps = authority_re().captures(reference.trim())?;
        let id: u64 = caps.get(3)?.as_str().parse().ok()?;
        if caps.get(1).is_some() {
            Some(AuthorityRef::Pleiades(id))
        } else if caps.get(2).is_some() {
            Some(AuthorityRef::GeoNames(id))
        } else {
            None
        }
    }

    /// URI canônica da referência.
    pub fn url(&self) -> String {
        match self {
            AuthorityRef::Pleiades(id) => format!("{}{}", PLEIADES_URL_BASE, id),
            AuthorityRef::GeoNames(id) => format!("{}{}", GEONAMES_URL_BASE, id),
        }
    }
}

/// Fonte de coordenadas `(latitude, longitude)`.
pub trait Gazetteer {
    fn coordinates(&self, reference: &AuthorityRef) -> Option<(f64, f64)>;
}

/// Gazetteer em memória, carregado dos dumps locais.
#[derive(Debug, Clone, Default)]
pub struct MemoryGazetteer {
    pleiades: HashMap<u64, (f64, f64)>,
    geonames: HashMap<u64, (f64, f64)>,
}

fn parse_coords(lat: Option<&str>, lon: Option<&str>) -> Option<(f64, f64)> {
    let lat: f64 = lat?.trim().parse().ok()?;
    let lon: f64 = lon?.trim().parse().ok()?;
    Some((lat, lon))
}

fn parse_id(field: Option<&str>) -> Option<u64> {
    field?.trim().parse().ok()
}

impl MemoryGazetteer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pleiades.len() + self.geonames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, reference: AuthorityRef, coords: (f64, f64)) {
        match reference {
            AuthorityRef::Pleiades(id) => self.pleiades.insert(id, coords),
            AuthorityRef::GeoNames(id) => self.geonames.insert(id, coords),
        };
    }

    /// Carrega o CSV do Pleiades. Devolve quantas linhas foram aceitas.
    ///
    /// As colunas são localizadas pelo nome no cabeçalho; linhas sem coordenadas
    /// válidas são ignoradas.
    pub fn load_pleiades_csv<R: Read>(&mut self, reader: R) -> Result<usize, FormatError> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);
        let (id, lat, lon) = match (column("id"), column("reprLat"), column("reprLong")) {
            (Some(id), Some(lat), Some(lon)) => (id, lat, lon),
            _ => {
                return Err(FormatError::Header {
                    expected: "id,title,reprLat,reprLong".to_string(),
                    found: headers.iter().collect::<Vec<_>>().join(","),
                })
            }
        };

        let mut accepted = 0;
        let mut record = StringRecord::new();
        while rdr.read_record(&mut record)? {
            match (parse_id(record.get(id)), parse_coords(record.get(lat), record.get(lon))) {
                (Some(pid), Some(coords)) => {
                    self.pleiades.insert(pid, coords);
                    accepted += 1;
                }
                _ => debug!(line = record.position().map(|p| p.line()), "linha do Pleiades ignorada"),
            }
        }
        Ok(accepted)
    }

    /// Carrega o dump TSV do GeoNames (sem cabeçalho, sem aspas).
    pub fn load_geonames_tsv<R: Read>(&mut self, reader: R) -> Result<usize, FormatError> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .from_reader(reader);

        let mut accepted = 0;
        let mut record = StringRecord::new();
        while rdr.read_record(&mut record)? {
            match (parse_id(record.get(0)), parse_coords(record.get(4), record.get(5))) {
                (Some(gid), Some(coords)) => {
                    self.geonames.insert(gid, coords);
                    accepted += 1;
                }
                _ => debug!(line = record.position().map(|p| p.line()), "linha do GeoNames ignorada"),
            }
        }
        Ok(accepted)
    }

    pub fn load_pleiades_path(&mut self, path: impl AsRef<Path>) -> Result<usize, RegistryError> {
        Ok(self.load_pleiades_csv(BufReader::new(File::open(path)?))?)
    }

    pub fn load_geonames_path(&mut self, path: impl AsRef<Path>) -> Result<usize, RegistryError> {
        Ok(self.load_geonames_tsv(BufReader::new(File::open(path)?))?)
    }
}

impl Gazetteer for MemoryGazetteer {
    fn coordinates(&self, reference: &AuthorityRef) -> Option<(f64, f64)> {
        match reference {
            AuthorityRef::Pleiades(id) => self.pleiades.get(id).copied(),
            AuthorityRef::GeoNames(id) => self.geonames.get(id).copied(),
        }
    }
}

/// Linha do relatório de lugares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRow {
    pub key: String,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub geotype: Option<String>,
    pub kind: EntityKind,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Lista lugares e acidentes geográficos do registro, na ordem de descoberta,
/// com coordenadas quando o gazetteer as conhece.
pub fn place_report(registry: &Registry, gazetteer: Option<&dyn Gazetteer>) -> Vec<PlaceRow> {
    registry
        .entities()
        .filter(|e| e.kind.has_geotype())
        .map(|e| {
            let coords = e
                .reference
                .as_deref()
                .and_then(AuthorityRef::parse)
                .and_then(|r| gazetteer.and_then(|g| g.coordinates(&r)));
            PlaceRow {
                key: e.key.clone(),
                reference: e.reference.clone(),
                geotype: e.geotype.clone(),
                kind: e.kind,
                lat: coords.map(|c| c.0),
                lon: coords.map(|c| c.1),
            }
        })
        .collect()
}
