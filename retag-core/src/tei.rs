//! # Utilitários de Seção TEI
//!
//! Operações de baixo nível sobre documentos XML-TEI:
//!
//! - [`isolate_body`]: separa o documento em cabeçalho e corpo, no início da seção `<text>`
//!   (localizada pela varredura de [`crate::markup`]).
//! - [`parse_document`]: constrói uma árvore mínima de elementos (via `quick-xml`),
//!   rejeitando XML mal formado.
//! - [`flatten_text`]: concatena todo o texto de uma subárvore.
//! - [`normalize_tag`]: reduz `{http://www.tei-c.org/ns/1.0}persName` para `tei:persName`.
//!
//! A árvore é deliberadamente simples: o descobridor só precisa de nomes, atributos e
//! texto, na ordem do documento.

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use crate::error::StructureError;
use crate::markup::{scan_markup, SpanKind};

/// Namespace padrão do TEI
pub const TEI_NS: &str = "http://www.tei-c.org/ns/1.0";

/// Nome da seção que contém o corpo do documento
pub const BODY_SECTION: &str = "text";

/// Separa o documento em `(cabeçalho, corpo)`.
///
/// O cabeçalho termina com a própria tag de abertura `<text ...>`; o corpo é todo o
/// restante (incluindo `</text>` e o fechamento do elemento raiz). Assim
/// `head + body == document` sempre vale.
///
/// A tag é localizada pela mesma varredura de marcação da reinjeção: valores de
/// atributos entre aspas podem conter `>`, e `<text>` dentro de comentários ou CDATA não
/// conta. Um `<text/>` vazio não abre corpo.
///
/// # Erros
/// [`StructureError::SectionCount`] se a tag de abertura não aparece exatamente uma vez.
pub fn isolate_body(document: &str) -> Result<(&str, &str), StructureError> {
    let starts: Vec<usize> = scan_markup(document)
        .into_iter()
        .filter(|span| {
            matches!(
                &span.kind,
                SpanKind::Tag { name, closing: false, self_closing: false } if name == BODY_SECTION
            )
        })
        .map(|span| span.end)
        .collect();
    match starts.as_slice() {
        [end] => Ok(document.split_at(*end)),
        _ => Err(StructureError::SectionCount {
            section: BODY_SECTION.to_string(),
            found: starts.len(),
        }),
    }
}

/// Reduz um nome qualificado em notação Clark para a forma prefixada `tei:`.
pub fn normalize_tag(name: &str) -> String {
    name.replace(&format!("{{{}}}", TEI_NS), "tei:")
}

/// Verdadeiro se o nome normalizado corresponde à tag TEI pedida.
///
/// Elementos sem namespace são aceitos como se fossem TEI.
pub fn is_tei_tag(name: &str, tag: &str) -> bool {
    name.strip_prefix("tei:").unwrap_or(name) == tag
}

/// Nó da árvore: elemento ou texto.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// Elemento XML com nome normalizado, atributos (valores já decodificados) e filhos.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Nome normalizado (ex: `tei:persName`)
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Valor de um atributo, se presente.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Filhos diretos que são elementos.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Percurso em pré-ordem (ordem do documento), incluindo o próprio elemento.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

/// Iterador em pré-ordem sobre uma subárvore.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        let children: Vec<&Element> = current.child_elements().collect();
        self.stack.extend(children.into_iter().rev());
        Some(current)
    }
}

/// Concatena todo o texto da subárvore, sem espaços nas bordas.
pub fn flatten_text(element: &Element) -> String {
    fn collect(element: &Element, out: &mut String) {
        for child in &element.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => collect(e, out),
            }
        }
    }
    let mut out = String::new();
    collect(element, &mut out);
    out.trim().to_string()
}

/// Exige exatamente um filho direto com a tag pedida.
pub fn find_single_node<'a>(tag: &str, parent: &'a Element) -> Result<&'a Element, StructureError> {
    let found: Vec<&Element> = parent
        .child_elements()
        .filter(|e| is_tei_tag(&e.name, tag))
        .collect();
    match found.as_slice() {
        [single] => Ok(single),
        _ => Err(StructureError::SectionCount {
            section: tag.to_string(),
            found: found.len(),
        }),
    }
}

/// Todos os elementos da subárvore (raiz incluída) com a tag pedida, na ordem do documento.
pub fn find_nodes<'a>(tag: &str, root: &'a Element) -> Vec<&'a Element> {
    root.descendants().filter(|e| is_tei_tag(&e.name, tag)).collect()
}

fn qualified_name(resolved: &ResolveResult, local: &[u8]) -> String {
    let local = String::from_utf8_lossy(local);
    match resolved {
        ResolveResult::Bound(ns) => {
            normalize_tag(&format!("{{{}}}{}", String::from_utf8_lossy(ns.as_ref()), local))
        }
        _ => local.into_owned(),
    }
}

fn read_attributes(
    start: &quick_xml::events::BytesStart<'_>,
    element: &mut Element,
) -> Result<(), StructureError> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| StructureError::Malformed(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(())
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), StructureError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(StructureError::Malformed("mais de um elemento raiz".to_string())),
    }
    Ok(())
}

/// Faz o parse completo do documento e devolve o elemento raiz.
///
/// # Erros
/// [`StructureError::Malformed`] para qualquer violação de boa formação: tags
/// desbalanceadas, entidades desconhecidas, múltiplas raízes ou ausência de raiz.
pub fn parse_document(xml: &str) -> Result<Element, StructureError> {
    let mut reader = NsReader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(start) => {
                let mut element = Element::new(qualified_name(&resolved, start.local_name().as_ref()));
                read_attributes(&start, &mut element)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let mut element = Element::new(qualified_name(&resolved, start.local_name().as_ref()));
                read_attributes(&start, &mut element)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    StructureError::Malformed("tag de fechamento sem abertura".to_string())
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text.unescape()?.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let raw = data.into_inner();
                    parent
                        .children
                        .push(Node::Text(String::from_utf8_lossy(&raw).into_owned()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(StructureError::Malformed(format!(
            "elemento '{}' não foi fechado",
            open.name
        )));
    }
    root.ok_or_else(|| StructureError::Malformed("documento sem elemento raiz".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader><title>Vita</title></teiHeader><text><body><p>Frater <persName key="Iohannes">Iohannes <placeName>de Eboraco</placeName></persName> venit.</p></body></text></TEI>"#;

    #[test]
    fn test_isolate_body_splits_after_start_tag() {
        let (head, body) = isolate_body(DOC).unwrap();
        assert!(head.ends_with("<text>"));
        assert!(body.starts_with("<body>"));
        assert_eq!(format!("{}{}", head, body), DOC);
    }

    #[test]
    fn test_isolate_body_accepts_attributes() {
        let doc = r#"<TEI><text xml:lang="la"><p>x</p></text></TEI>"#;
        let (head, body) = isolate_body(doc).unwrap();
        assert_eq!(head, r#"<TEI><text xml:lang="la">"#);
        assert_eq!(body, "<p>x</p></text></TEI>");
    }

    #[test]
    fn test_isolate_body_rejects_missing_and_duplicate() {
        let missing = isolate_body("<TEI><teiHeader/></TEI>");
        assert!(matches!(missing, Err(StructureError::SectionCount { found: 0, .. })));

        let twice = isolate_body("<TEI><text>a</text><text>b</text></TEI>");
        assert!(matches!(twice, Err(StructureError::SectionCount { found: 2, .. })));

        // <textarea> e <text/> não contam como início de corpo
        let other = isolate_body("<TEI><textarea/><text/></TEI>");
        assert!(matches!(other, Err(StructureError::SectionCount { found: 0, .. })));
    }

    #[test]
    fn test_isolate_body_is_quote_and_comment_aware() {
        let doc = r#"<TEI><!-- <text> --><text rend="a>b"><p>x</p></text></TEI>"#;
        let (head, body) = isolate_body(doc).unwrap();
        assert_eq!(head, r#"<TEI><!-- <text> --><text rend="a>b">"#);
        assert_eq!(body, "<p>x</p></text></TEI>");

        let empty = isolate_body("<TEI><text /></TEI>");
        assert!(matches!(empty, Err(StructureError::SectionCount { found: 0, .. })));
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("{http://www.tei-c.org/ns/1.0}persName"), "tei:persName");
        assert_eq!(normalize_tag("persName"), "persName");
        assert!(is_tei_tag("tei:persName", "persName"));
        assert!(is_tei_tag("persName", "persName"));
        assert!(!is_tei_tag("tei:placeName", "persName"));
    }

    #[test]
    fn test_parse_and_flatten() {
        let root = parse_document(DOC).unwrap();
        assert_eq!(root.name, "tei:TEI");
        let text = find_single_node("text", &root).unwrap();
        let persons = find_nodes("persName", text);
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].attr("key"), Some("Iohannes"));
        assert_eq!(flatten_text(persons[0]), "Iohannes de Eboraco");
    }

    #[test]
    fn test_find_nodes_in_document_order() {
        let root = parse_document("<r><a n=\"1\"><a n=\"2\"/></a><b><a n=\"3\"/></b></r>").unwrap();
        let order: Vec<_> = find_nodes("a", &root).iter().filter_map(|e| e.attr("n")).collect();
        assert_eq!(order, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_parse_decodes_entities_in_text_and_attributes() {
        let root = parse_document(r#"<r k="a &amp; b">x &lt; y</r>"#).unwrap();
        assert_eq!(root.attr("k"), Some("a & b"));
        assert_eq!(flatten_text(&root), "x < y");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_document("<a><b></a>"), Err(StructureError::Malformed(_))));
        assert!(matches!(parse_document("<a><b>"), Err(StructureError::Malformed(_))));
        assert!(matches!(parse_document(""), Err(StructureError::Malformed(_))));
    }

    #[test]
    fn test_find_single_node_counts_direct_children_only() {
        let root = parse_document("<TEI><group><text/></group></TEI>").unwrap();
        assert!(matches!(
            find_single_node("text", &root),
            Err(StructureError::SectionCount { found: 0, .. })
        ));
    }
}
