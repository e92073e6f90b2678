//! # Modelo de Entidade
//!
//! Uma [`Entity`] representa um referente real (pessoa, lugar ou acidente geográfico)
//! rastreado ao longo de toda a coleção de documentos.
//!
//! | Tipo                      | Elemento TEI | Exemplos                        |
//! |---------------------------|--------------|---------------------------------|
//! | [`EntityKind::Person`]     | `persName`   | Iohannes, Marcus Aurelius       |
//! | [`EntityKind::Place`]      | `placeName`  | Eboracum, Roma                  |
//! | [`EntityKind::Geographic`] | `geogName`   | Tamesis, Alpes                  |
//!
//! ## Regras de evolução
//!
//! - `variants` e `files` só crescem.
//! - `reference` e `geotype` são preenchidos uma única vez: o primeiro valor vence.
//! - A própria chave é sempre uma variante (é a semente do conjunto).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefixo das chaves provisórias geradas para menções sem chave
pub const PLACEHOLDER_PREFIX: &str = "[[UNKNOWN:";
/// Sufixo das chaves provisórias
pub const PLACEHOLDER_SUFFIX: &str = "]]";

/// Categoria da entidade.
///
/// A ordem das variantes é a ordem canônica de processamento: nomes de pessoas
/// podem conter nomes de lugares ("Frater Iohannes de Eboraco"), e nomes de lugares
/// podem conter nomes geográficos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// **Pessoa**: `<persName>`
    Person,
    /// **Lugar**: `<placeName>`
    Place,
    /// **Geográfico**: `<geogName>`
    Geographic,
}

impl EntityKind {
    /// Todos os tipos, na ordem de processamento
    pub const ALL: [EntityKind; 3] = [EntityKind::Person, EntityKind::Place, EntityKind::Geographic];

    /// Nome do elemento TEI correspondente
    pub fn tag_name(&self) -> &'static str {
        match self {
            EntityKind::Person => "persName",
            EntityKind::Place => "placeName",
            EntityKind::Geographic => "geogName",
        }
    }

    /// Tenta reconhecer um nome de elemento TEI (ex: "placeName" → Some(Place))
    pub fn from_tag_name(s: &str) -> Option<Self> {
        match s {
            "persName" => Some(EntityKind::Person),
            "placeName" => Some(EntityKind::Place),
            "geogName" => Some(EntityKind::Geographic),
            _ => None,
        }
    }

    /// Só lugares e acidentes geográficos carregam `type` (geotype)
    pub fn has_geotype(&self) -> bool {
        matches!(self, EntityKind::Place | EntityKind::Geographic)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_name())
    }
}

/// Identidade composta de uma entidade: `(tipo, chave)`.
pub type EntityId = (EntityKind, String);

/// Um referente canônico e todas as suas formas atestadas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// Identificador canônico, único dentro do tipo
    pub key: String,
    /// URI de autoridade externa (Pleiades, GeoNames, VIAF...)
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    /// Subclassificação livre (atributo `type`), só para lugares
    pub geotype: Option<String>,
    /// Formas de superfície normalizadas (a chave sempre incluída)
    pub variants: BTreeSet<String>,
    /// Identificadores dos documentos onde a entidade ocorre
    pub files: BTreeSet<String>,
}

impl Entity {
    /// Cria a entidade com a própria chave como primeira variante.
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        let key = key.into().trim().to_string();
        let mut variants = BTreeSet::new();
        if !key.is_empty() {
            variants.insert(key.clone());
        }
        Self {
            kind,
            key,
            reference: None,
            geotype: None,
            variants,
            files: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        (self.kind, self.key.clone())
    }

    /// Adiciona uma variante normalizada; vazias são ignoradas.
    pub fn add_variant(&mut self, variant: &str) {
        let v = variant.trim();
        if !v.is_empty() {
            self.variants.insert(v.to_string());
        }
    }

    pub fn add_file(&mut self, file: &str) {
        let f = file.trim();
        if !f.is_empty() {
            self.files.insert(f.to_string());
        }
    }

    /// Define `ref` apenas se ainda não houver valor.
    pub fn fill_reference(&mut self, reference: Option<&str>) {
        if self.reference.is_none() {
            self.reference = non_empty(reference);
        }
    }

    /// Define `geotype` apenas se ainda não houver valor (e se o tipo admitir).
    pub fn fill_geotype(&mut self, geotype: Option<&str>) {
        if self.geotype.is_none() && self.kind.has_geotype() {
            self.geotype = non_empty(geotype);
        }
    }

    /// Mescla outra entidade de mesma identidade: união de variantes e arquivos,
    /// `ref`/`geotype` preservados se já definidos.
    ///
    /// Quando os dois lados trazem valores não vazios e diferentes, o valor de `self`
    /// é mantido e o conflito é descartado em silêncio.
    pub fn merge(&mut self, other: &Entity) {
        debug_assert_eq!(self.id(), other.id());
        self.variants.extend(other.variants.iter().cloned());
        self.files.extend(other.files.iter().cloned());
        self.fill_reference(other.reference.as_deref());
        self.fill_geotype(other.geotype.as_deref());
    }

    /// Verdadeiro se a chave foi sintetizada pelo descobridor.
    pub fn is_placeholder(&self) -> bool {
        is_placeholder_key(&self.key)
    }

    /// Renderiza a tag canônica em volta do texto encontrado.
    ///
    /// `content` é inserido literalmente (já está em forma de marcação);
    /// valores de atributos são escapados.
    ///
    /// # Exemplo
    /// `<placeName key="Eboracum" ref="https://pleiades.stoa.org/places/89167" type="urbs">Eboraco</placeName>`
    pub fn render_tag(&self, content: &str, with_key: bool) -> String {
        let name = self.kind.tag_name();
        let mut s = format!("<{}", name);
        if with_key {
            s.push_str(&format!(" key=\"{}\"", escape_attr(&self.key)));
        }
        if let Some(r) = &self.reference {
            s.push_str(&format!(" ref=\"{}\"", escape_attr(r)));
        }
        if self.kind.has_geotype() {
            if let Some(g) = &self.geotype {
                s.push_str(&format!(" type=\"{}\"", escape_attr(g)));
            }
        }
        s.push_str(&format!(">{}</{}>", content, name));
        s
    }
}

/// Chave provisória para uma menção sem chave: `[[UNKNOWN:Aurelius]]`.
pub fn placeholder_key(variant: &str) -> String {
    format!("{}{}{}", PLACEHOLDER_PREFIX, variant, PLACEHOLDER_SUFFIX)
}

/// Reconhece chaves geradas por [`placeholder_key`].
pub fn is_placeholder_key(key: &str) -> bool {
    key.starts_with(PLACEHOLDER_PREFIX) && key.ends_with(PLACEHOLDER_SUFFIX)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Escapa um valor para uso entre aspas duplas num atributo XML.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapa texto de conteúdo (`&`, `<`, `>`), a forma em que as variantes aparecem no corpo.
pub fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
