//! # Registro de Entidades
//!
//! O [`Registry`] guarda todas as entidades conhecidas, indexadas por `(tipo, chave)`,
//! preservando a ordem de primeira inserção (a "ordem de descoberta").
//!
//! Para a reinjeção ele fornece um [`VariantIndex`]: um retrato plano
//! `variante → entidade`, reconstruído a cada consulta. Se duas entidades reivindicam a
//! mesma variante, vence a que aparece **depois** na ordem de descoberta. Esse
//! comportamento é mantido como está; [`Registry::conflicts`] apenas o relata.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entity::{Entity, EntityId, EntityKind};

/// Conjunto ordenado de entidades com índice por identidade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Entity>", into = "Vec<Entity>")]
pub struct Registry {
    entities: Vec<Entity>,
    index: HashMap<EntityId, usize>,
}

/// Uma variante reivindicada por mais de uma entidade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConflict {
    pub variant: String,
    /// Entidade que recebe a variante no índice (a última na ordem de descoberta)
    pub winner: EntityId,
    /// As demais, na ordem de descoberta
    pub losers: Vec<EntityId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entidades na ordem de descoberta.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn get(&self, kind: EntityKind, key: &str) -> Option<&Entity> {
        self.index
            .get(&(kind, key.to_string()))
            .map(|&i| &self.entities[i])
    }

    pub fn get_mut(&mut self, kind: EntityKind, key: &str) -> Option<&mut Entity> {
        match self.index.get(&(kind, key.to_string())) {
            Some(&i) => Some(&mut self.entities[i]),
            None => None,
        }
    }

    pub fn contains(&self, kind: EntityKind, key: &str) -> bool {
        self.index.contains_key(&(kind, key.to_string()))
    }

    /// Devolve a entidade existente ou cria uma nova ao final da ordem.
    ///
    /// O segundo valor indica se a entidade foi criada agora.
    pub fn get_or_create(&mut self, kind: EntityKind, key: &str) -> (&mut Entity, bool) {
        let id = (kind, key.trim().to_string());
        let (i, created) = match self.index.get(&id) {
            Some(&i) => (i, false),
            None => {
                self.entities.push(Entity::new(kind, id.1.clone()));
                let i = self.entities.len() - 1;
                self.index.insert(id, i);
                (i, true)
            }
        };
        (&mut self.entities[i], created)
    }

    /// Insere a entidade, mesclando-a com a existente de mesma identidade.
    pub fn insert(&mut self, entity: Entity) {
        match self.index.get(&entity.id()) {
            Some(&i) => self.entities[i].merge(&entity),
            None => {
                self.index.insert(entity.id(), self.entities.len());
                self.entities.push(entity);
            }
        }
    }

    /// Mescla outro registro neste (este lado tem precedência em `ref`/`geotype`).
    ///
    /// Entidades novas entram no final, na ordem em que aparecem em `other`.
    pub fn merge(&mut self, other: Registry) {
        for entity in other.entities {
            self.insert(entity);
        }
    }

    /// Constrói o índice plano `variante → entidade` para os tipos pedidos.
    ///
    /// Conflitos são registrados via `tracing` mas não alteram o resultado.
    pub fn variant_index(&self, kinds: &[EntityKind]) -> VariantIndex<'_> {
        let mut map: HashMap<&str, &Entity> = HashMap::new();
        for entity in self.entities.iter().filter(|e| kinds.contains(&e.kind)) {
            for variant in &entity.variants {
                let variant = variant.trim();
                if !variant.is_empty() {
                    map.insert(variant, entity);
                }
            }
        }
        for conflict in self.conflicts_among(kinds) {
            warn!(
                variant = %conflict.variant,
                winner = %conflict.winner.1,
                losers = conflict.losers.len(),
                "variante reivindicada por mais de uma entidade"
            );
        }
        VariantIndex { map }
    }

    /// Lista as variantes reivindicadas por mais de uma entidade.
    pub fn conflicts(&self) -> Vec<VariantConflict> {
        self.conflicts_among(&EntityKind::ALL)
    }

    fn conflicts_among(&self, kinds: &[EntityKind]) -> Vec<VariantConflict> {
        let mut claims: BTreeMap<&str, Vec<EntityId>> = BTreeMap::new();
        for entity in self.entities.iter().filter(|e| kinds.contains(&e.kind)) {
            for variant in &entity.variants {
                claims.entry(variant.as_str()).or_default().push(entity.id());
            }
        }
        claims
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .filter_map(|(variant, mut ids)| {
                let winner = ids.pop()?;
                Some(VariantConflict {
                    variant: variant.to_string(),
                    winner,
                    losers: ids,
                })
            })
            .collect()
    }
}

impl From<Vec<Entity>> for Registry {
    fn from(entities: Vec<Entity>) -> Self {
        let mut registry = Registry::new();
        for entity in entities {
            registry.insert(entity);
        }
        registry
    }
}

impl From<Registry> for Vec<Entity> {
    fn from(registry: Registry) -> Self {
        registry.entities
    }
}

impl FromIterator<Entity> for Registry {
    fn from_iter<T: IntoIterator<Item = Entity>>(iter: T) -> Self {
        Registry::from(iter.into_iter().collect::<Vec<_>>())
    }
}

/// Retrato `variante → entidade` usado pela reinjeção.
pub struct VariantIndex<'r> {
    map: HashMap<&'r str, &'r Entity>,
}

impl<'r> VariantIndex<'r> {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn resolve(&self, variant: &str) -> Option<&'r Entity> {
        self.map.get(variant).copied()
    }

    /// Variantes na ordem de substituição: comprimento decrescente (em caracteres),
    /// depois ordem lexicográfica crescente.
    ///
    /// Garante que "Marcus Aurelius" seja consumido antes de "Marcus".
    pub fn ordered(&self) -> Vec<(&'r str, &'r Entity)> {
        let mut pairs: Vec<(&'r str, &'r Entity)> = self.map.iter().map(|(v, e)| (*v, *e)).collect();
        pairs.sort_by(|a, b| {
            b.0.chars()
                .count()
                .cmp(&a.0.chars().count())
                .then_with(|| a.0.cmp(b.0))
        });
        pairs
    }
}
