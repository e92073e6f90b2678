//! # Camada de Proteção por Marcadores
//!
//! A reinjeção faz busca-e-substituição de substrings num corpo XML cru. Sem cuidado,
//! uma variante como "Marcus" casaria dentro de `<note ref="Marcus">` e partiria a
//! sintaxe da tag ao meio.
//!
//! ## Estratégia
//!
//! 1. **Varredura única** ([`scan_markup`]): um passe linear classifica cada byte do corpo
//!    como *texto* ou *marcação* (tags, comentários, CDATA, instruções de processamento).
//!    Valores de atributos entre aspas podem conter `>` sem encerrar a tag.
//! 2. **Peças** ([`ProtectedBody`]): o corpo vira uma sequência de peças. Só as peças
//!    [`Piece::Text`] são pesquisáveis; marcação alheia vira um [`Marker`] opaco.
//! 3. **Reivindicação**: cada ocorrência aceita de uma variante é trocada por um novo
//!    marcador que guarda a tag canônica já renderizada. Variantes mais curtas,
//!    processadas depois, nunca enxergam texto já reivindicado.
//! 4. **Resolução**: a remontagem é uma concatenação direta, consultando a
//!    [`MarkerTable`] para cada marcador.

use std::collections::HashMap;
use std::fmt;

use crate::entity::EntityKind;
use crate::error::InjectError;

/// Papel de um marcador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Esconde sintaxe do documento que não pode ser tocada
    Protected,
    /// Guarda uma tag de entidade ainda não inserida
    Entity,
}

/// Marcador temporário com identificador sequencial por invocação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Marker {
    pub kind: MarkerKind,
    pub id: usize,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            MarkerKind::Protected => "TAG",
            MarkerKind::Entity => "ID",
        };
        write!(f, "[[{}{:010}]]", prefix, self.id)
    }
}

/// Tabela `marcador → texto original/renderizado`.
#[derive(Debug, Default)]
pub struct MarkerTable {
    protected_count: usize,
    entity_count: usize,
    values: HashMap<Marker, String>,
}

impl MarkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self, kind: MarkerKind, value: String) -> Marker {
        let counter = match kind {
            MarkerKind::Protected => &mut self.protected_count,
            MarkerKind::Entity => &mut self.entity_count,
        };
        *counter += 1;
        let marker = Marker { kind, id: *counter };
        self.values.insert(marker, value);
        marker
    }

    /// Registra sintaxe protegida e devolve seu marcador.
    pub fn protect(&mut self, original: impl Into<String>) -> Marker {
        self.issue(MarkerKind::Protected, original.into())
    }

    /// Registra uma tag de entidade renderizada e devolve seu marcador.
    pub fn claim(&mut self, rendered: impl Into<String>) -> Marker {
        self.issue(MarkerKind::Entity, rendered.into())
    }

    pub fn resolve(&self, marker: Marker) -> Option<&str> {
        self.values.get(&marker).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Quantos marcadores de entidade foram emitidos.
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }
}

/// Classe de um trecho do corpo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanKind {
    Text,
    /// Tag de abertura, fechamento ou vazia, com o nome como aparece no documento
    Tag {
        name: String,
        closing: bool,
        self_closing: bool,
    },
    /// Comentário, CDATA, instrução de processamento ou declaração
    Other,
}

/// Trecho contíguo `[start, end)` (em bytes) do corpo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl Span {
    pub fn is_markup(&self) -> bool {
        !matches!(self.kind, SpanKind::Text)
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

/// Posição logo após o `>` que fecha a tag, ignorando `>` dentro de aspas.
fn tag_end(body: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, &b) in body.as_bytes()[from..].iter().enumerate() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(b),
            (None, b'>') => return Some(from + offset + 1),
            _ => {}
        }
    }
    None
}

fn delimited_end(body: &str, from: usize, open: &str, close: &str) -> Option<usize> {
    let after = from + open.len();
    body[after..].find(close).map(|p| after + p + close.len())
}

/// Tenta reconhecer marcação começando em `at` (onde há um `<`).
fn markup_at(body: &str, at: usize) -> Option<(usize, SpanKind)> {
    let rest = &body[at..];
    if rest.starts_with("<!--") {
        return delimited_end(body, at, "<!--", "-->").map(|end| (end, SpanKind::Other));
    }
    if rest.starts_with("<![CDATA[") {
        return delimited_end(body, at, "<![CDATA[", "]]>").map(|end| (end, SpanKind::Other));
    }
    if rest.starts_with("<?") {
        return delimited_end(body, at, "<?", "?>").map(|end| (end, SpanKind::Other));
    }
    if rest.starts_with("<!") {
        return tag_end(body, at + 2).map(|end| (end, SpanKind::Other));
    }

    let closing = rest.starts_with("</");
    let name_from = at + if closing { 2 } else { 1 };
    let mut chars = body[name_from..].char_indices();
    match chars.next() {
        Some((_, c)) if is_name_start(c) => {}
        _ => return None,
    }
    let name_len = body[name_from..]
        .char_indices()
        .find(|&(_, c)| !is_name_char(c))
        .map(|(i, _)| i)
        .unwrap_or(body.len() - name_from);
    let name = body[name_from..name_from + name_len].to_string();
    let end = tag_end(body, name_from + name_len)?;
    let self_closing = !closing && body[..end - 1].ends_with('/');
    Some((
        end,
        SpanKind::Tag {
            name,
            closing,
            self_closing,
        },
    ))
}

/// Passe linear que particiona o corpo em trechos de texto e de marcação.
///
/// Cada byte pertence a exatamente um [`Span`]; a classificação é calculada uma vez e
/// reutilizada, sem varreduras para trás a cada candidato. Um `<` que não inicia
/// marcação reconhecível permanece texto.
pub fn scan_markup(body: &str) -> Vec<Span> {
    let bytes = body.as_bytes();
    let mut spans = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some((end, kind)) = markup_at(body, i) {
                if text_start < i {
                    spans.push(Span {
                        start: text_start,
                        end: i,
                        kind: SpanKind::Text,
                    });
                }
                spans.push(Span { start: i, end, kind });
                i = end;
                text_start = end;
                continue;
            }
        }
        i += 1;
    }
    if text_start < bytes.len() {
        spans.push(Span {
            start: text_start,
            end: bytes.len(),
            kind: SpanKind::Text,
        });
    }
    spans
}

/// Peça do corpo em trabalho.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    /// Texto livre, pesquisável
    Text(String),
    /// Tag de um tipo de entidade gerenciado, mantida literalmente
    Managed {
        kind: EntityKind,
        raw: String,
        closing: bool,
        self_closing: bool,
    },
    /// Sintaxe alheia escondida atrás de um marcador
    Protected(Marker),
    /// Ocorrência já reivindicada por uma variante
    Claimed(Marker),
}

/// Política de aceitação de uma ocorrência.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Modo *replace*: a ocorrência precisa estar cercada por caracteres não-palavra
    /// (ou pela borda da peça).
    WordBounded,
    /// Modo *add*: só texto fora de qualquer tag gerenciada; a ocorrência também não pode
    /// encostar numa delas.
    FreeText,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Corpo particionado em peças, com a tabela de marcadores da invocação.
#[derive(Debug)]
pub struct ProtectedBody {
    pieces: Vec<Piece>,
    table: MarkerTable,
}

impl ProtectedBody {
    /// Protege toda a marcação cujo nome não é um dos tipos gerenciados.
    pub fn protect(body: &str, managed: &[EntityKind]) -> Self {
        let mut table = MarkerTable::new();
        let mut pieces = Vec::new();
        for span in scan_markup(body) {
            let raw = &body[span.start..span.end];
            let piece = match &span.kind {
                SpanKind::Text => Piece::Text(raw.to_string()),
                SpanKind::Tag {
                    name,
                    closing,
                    self_closing,
                } => match EntityKind::from_tag_name(name) {
                    Some(kind) if managed.contains(&kind) => Piece::Managed {
                        kind,
                        raw: raw.to_string(),
                        closing: *closing,
                        self_closing: *self_closing,
                    },
                    _ => Piece::Protected(table.protect(raw)),
                },
                SpanKind::Other => Piece::Protected(table.protect(raw)),
            };
            pieces.push(piece);
        }
        Self { pieces, table }
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn table(&self) -> &MarkerTable {
        &self.table
    }

    /// Remove todas as tags gerenciadas, deixando o texto interno nu.
    ///
    /// Textos que ficam adjacentes são fundidos numa única peça.
    pub fn strip_managed(&mut self) -> usize {
        let before = self.pieces.len();
        let mut merged: Vec<Piece> = Vec::with_capacity(before);
        let mut stripped = 0;
        for piece in self.pieces.drain(..) {
            match piece {
                Piece::Managed { .. } => stripped += 1,
                Piece::Text(t) => match merged.last_mut() {
                    Some(Piece::Text(prev)) => prev.push_str(&t),
                    _ => merged.push(Piece::Text(t)),
                },
                other => merged.push(other),
            }
        }
        self.pieces = merged;
        stripped
    }

    /// Reivindica envoltórios exatos `<kind>needle</kind>` (sem atributos).
    pub fn claim_bare_wraps(&mut self, kind: EntityKind, needle: &str, rendered: &str) -> usize {
        if needle.is_empty() {
            return 0;
        }
        let open = format!("<{}>", kind.tag_name());
        let close = format!("</{}>", kind.tag_name());
        let mut out: Vec<Piece> = Vec::with_capacity(self.pieces.len());
        let mut claimed = 0;
        let mut i = 0;
        while i < self.pieces.len() {
            if let [Piece::Managed { raw: o, .. }, Piece::Text(t), Piece::Managed { raw: c, .. }] =
                &self.pieces[i..(i + 3).min(self.pieces.len())]
            {
                if *o == open && t == needle && *c == close {
                    out.push(Piece::Claimed(self.table.claim(rendered)));
                    claimed += 1;
                    i += 3;
                    continue;
                }
            }
            out.push(self.pieces[i].clone());
            i += 1;
        }
        self.pieces = out;
        claimed
    }

    /// Reivindica todas as ocorrências aceitas de `needle` nas peças de texto.
    ///
    /// Cada ocorrência recebe um marcador novo guardando `rendered`.
    pub fn claim_occurrences(&mut self, needle: &str, rendered: &str, policy: MatchPolicy) -> usize {
        if needle.is_empty() {
            return 0;
        }
        let mut out: Vec<Piece> = Vec::with_capacity(self.pieces.len());
        let mut claimed = 0;
        let mut depth: usize = 0;

        for idx in 0..self.pieces.len() {
            let text = match &self.pieces[idx] {
                Piece::Text(t) if policy == MatchPolicy::FreeText && depth > 0 => {
                    out.push(Piece::Text(t.clone()));
                    continue;
                }
                Piece::Text(t) => t,
                other => {
                    if let Piece::Managed {
                        closing,
                        self_closing,
                        ..
                    } = other
                    {
                        if *closing {
                            depth = depth.saturating_sub(1);
                        } else if !*self_closing {
                            depth += 1;
                        }
                    }
                    out.push(other.clone());
                    continue;
                }
            };
            let prev_managed = idx > 0 && matches!(self.pieces[idx - 1], Piece::Managed { .. });
            let next_managed = matches!(self.pieces.get(idx + 1), Some(Piece::Managed { .. }));

            let mut cursor = 0;
            let mut search = 0;
            while let Some(found) = text[search..].find(needle) {
                let start = search + found;
                let end = start + needle.len();
                let before = &text[..start];
                let after = &text[end..];

                let accepted = match policy {
                    MatchPolicy::WordBounded => {
                        !before.chars().next_back().is_some_and(is_word_char)
                            && !after.chars().next().is_some_and(is_word_char)
                    }
                    MatchPolicy::FreeText => {
                        !(start == 0 && prev_managed)
                            && !(end == text.len() && next_managed)
                            && !before.ends_with('>')
                            && !after.starts_with('<')
                    }
                };

                if accepted {
                    if cursor < start {
                        out.push(Piece::Text(text[cursor..start].to_string()));
                    }
                    out.push(Piece::Claimed(self.table.claim(rendered)));
                    claimed += 1;
                    cursor = end;
                    search = end;
                } else {
                    search = match policy {
                        MatchPolicy::FreeText => end,
                        MatchPolicy::WordBounded => {
                            start + text[start..].chars().next().map_or(1, char::len_utf8)
                        }
                    };
                }
                if search >= text.len() {
                    break;
                }
            }
            if cursor < text.len() {
                out.push(Piece::Text(text[cursor..].to_string()));
            }
        }

        self.pieces = out;
        claimed
    }

    /// Remonta o corpo, resolvendo todos os marcadores.
    pub fn resolve(self) -> Result<String, InjectError> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Managed { raw, .. } => out.push_str(raw),
                Piece::Protected(m) | Piece::Claimed(m) => {
                    let value = self
                        .table
                        .resolve(*m)
                        .ok_or(InjectError::UnresolvedMarker(*m))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}
