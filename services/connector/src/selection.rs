//! Cascading selection engine
//!
//! A [`SelectionChain`] is an ordered list of dependent levels
//! (datasource, table, fields). Each level walks
//! `Empty -> Loading -> Loaded -> Selected`. Changing the selection at one
//! level resets every level after it, so options fetched for an old parent
//! are never shown under a new one.
//!
//! Loads are tagged with a [`LoadTicket`] carrying the level's generation.
//! Every `begin_load` and every reset bumps the generation, so a response
//! that arrives after its level was superseded is discarded on arrival.

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    error::WorkflowError,
    models::{LevelKind, ResourceId, ResourceNode},
};

/// Lifecycle of a single chain level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Empty,
    Loading,
    Loaded,
    Selected,
}

impl fmt::Display for LevelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LevelState::Empty => "empty",
            LevelState::Loading => "loading",
            LevelState::Loaded => "loaded",
            LevelState::Selected => "selected",
        };
        f.write_str(name)
    }
}

/// One stage of the dependent-resource chain
#[derive(Debug, Clone)]
pub struct ChainLevel {
    kind: LevelKind,
    state: LevelState,
    options: Vec<ResourceNode>,
    selected: Option<ResourceId>,
    generation: u64,
    last_error: Option<String>,
}

impl ChainLevel {
    fn new(kind: LevelKind) -> Self {
        Self {
            kind,
            state: LevelState::Empty,
            options: Vec::new(),
            selected: None,
            generation: 0,
            last_error: None,
        }
    }

    fn reset(&mut self) {
        self.state = LevelState::Empty;
        self.options.clear();
        self.selected = None;
        self.last_error = None;
        self.generation += 1;
    }

    pub fn kind(&self) -> LevelKind {
        self.kind
    }

    pub fn state(&self) -> LevelState {
        self.state
    }

    pub fn options(&self) -> &[ResourceNode] {
        &self.options
    }

    pub fn selected_id(&self) -> Option<&ResourceId> {
        self.selected.as_ref()
    }

    /// The selected node, looked up among the current options
    pub fn selected(&self) -> Option<&ResourceNode> {
        let id = self.selected.as_ref()?;
        self.options.iter().find(|node| node.id() == id)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Error from the most recent failed load, cleared on the next load
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Proof that a load was issued for a specific level generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    level: usize,
    generation: u64,
}

impl LoadTicket {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What happened when a load result was offered to the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Options populated
    Applied { count: usize },
    /// Load succeeded with zero options; the level is `Loaded` but unselectable
    Empty,
    /// Load failed; the level is back to `Empty`
    Failed(String),
    /// The level moved on since the ticket was issued; nothing changed
    Stale,
}

/// What happened on a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Same id as before; no cascade
    Unchanged,
    /// Selection changed and `reset` downstream levels were emptied
    Changed { reset: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No chain level at index {0}")]
    NoSuchLevel(usize),

    #[error("The {kind} list is {state}, nothing can be selected yet")]
    NotSelectable { kind: LevelKind, state: LevelState },

    #[error("Unknown {kind} {id}")]
    UnknownOption { kind: LevelKind, id: ResourceId },
}

impl SelectionError {
    fn field(&self) -> String {
        match self {
            SelectionError::NoSuchLevel(_) => "selection".to_string(),
            SelectionError::NotSelectable { kind, .. }
            | SelectionError::UnknownOption { kind, .. } => kind.to_string(),
        }
    }
}

impl From<SelectionError> for WorkflowError {
    fn from(err: SelectionError) -> Self {
        WorkflowError::validation(err.field(), err.to_string())
    }
}

pub type SelectionResult<T> = Result<T, SelectionError>;

/// Ordered chain of dependent selection levels
#[derive(Debug, Clone)]
pub struct SelectionChain {
    levels: Vec<ChainLevel>,
}

impl SelectionChain {
    /// Create a chain with one level per kind, in order
    pub fn new(kinds: &[LevelKind]) -> Self {
        Self {
            levels: kinds.iter().copied().map(ChainLevel::new).collect(),
        }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> Option<&ChainLevel> {
        self.levels.get(index)
    }

    pub fn levels(&self) -> &[ChainLevel] {
        &self.levels
    }

    /// Index of the first level of the given kind
    pub fn index_of(&self, kind: LevelKind) -> Option<usize> {
        self.levels.iter().position(|level| level.kind == kind)
    }

    fn level_mut(&mut self, index: usize) -> SelectionResult<&mut ChainLevel> {
        self.levels
            .get_mut(index)
            .ok_or(SelectionError::NoSuchLevel(index))
    }

    /// Start loading options for a level
    ///
    /// The level and everything after it are emptied. Any ticket issued
    /// earlier for these levels becomes stale.
    pub fn begin_load(&mut self, index: usize) -> SelectionResult<LoadTicket> {
        if index >= self.levels.len() {
            return Err(SelectionError::NoSuchLevel(index));
        }

        self.reset_from(index);
        let level = self.level_mut(index)?;
        level.state = LevelState::Loading;
        debug!(
            "Loading {} options (generation {})",
            level.kind, level.generation
        );

        Ok(LoadTicket {
            level: index,
            generation: level.generation,
        })
    }

    /// Offer a load result to the chain
    ///
    /// The result is applied only while the ticket's generation is current
    /// and the level is still loading.
    pub fn complete_load<N, E>(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<N>, E>,
    ) -> LoadOutcome
    where
        N: Into<ResourceNode>,
        E: fmt::Display,
    {
        let Some(level) = self.levels.get_mut(ticket.level) else {
            return LoadOutcome::Stale;
        };

        if level.generation != ticket.generation || level.state != LevelState::Loading {
            debug!(
                "Discarding stale {} result (generation {}, current {})",
                level.kind, ticket.generation, level.generation
            );
            return LoadOutcome::Stale;
        }

        match result {
            Ok(nodes) => {
                level.options = nodes.into_iter().map(Into::into).collect();
                level.state = LevelState::Loaded;
                level.last_error = None;
                if level.options.is_empty() {
                    LoadOutcome::Empty
                } else {
                    LoadOutcome::Applied {
                        count: level.options.len(),
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!("Loading {} options failed: {}", level.kind, message);
                level.state = LevelState::Empty;
                level.options.clear();
                level.last_error = Some(message.clone());
                LoadOutcome::Failed(message)
            }
        }
    }

    /// Select an option at a level, cascading a reset to every later level
    ///
    /// Reselecting the current id is a no-op.
    pub fn select(&mut self, index: usize, id: &ResourceId) -> SelectionResult<SelectOutcome> {
        let level = self.level_mut(index)?;

        if !matches!(level.state, LevelState::Loaded | LevelState::Selected) {
            return Err(SelectionError::NotSelectable {
                kind: level.kind,
                state: level.state,
            });
        }

        if level.selected.as_ref() == Some(id) {
            return Ok(SelectOutcome::Unchanged);
        }

        if !level.options.iter().any(|node| node.id() == id) {
            return Err(SelectionError::UnknownOption {
                kind: level.kind,
                id: id.clone(),
            });
        }

        level.selected = Some(id.clone());
        level.state = LevelState::Selected;
        debug!("Selected {} {}", level.kind, id);

        let reset = self.levels.len() - index - 1;
        self.reset_from(index + 1);
        Ok(SelectOutcome::Changed { reset })
    }

    /// Empty a level and every level after it
    pub fn reset_from(&mut self, index: usize) {
        for level in self.levels.iter_mut().skip(index) {
            level.reset();
        }
    }

    pub fn selected(&self, index: usize) -> Option<&ResourceNode> {
        self.levels.get(index)?.selected()
    }

    pub fn options(&self, index: usize) -> &[ResourceNode] {
        self.levels
            .get(index)
            .map(|level| level.options())
            .unwrap_or_default()
    }

    pub fn state(&self, index: usize) -> Option<LevelState> {
        self.levels.get(index).map(|level| level.state)
    }

    /// Whether any level has a load in flight
    pub fn is_loading(&self) -> bool {
        self.levels
            .iter()
            .any(|level| level.state == LevelState::Loading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Datasource, Field, Table};

    const KINDS: [LevelKind; 3] = [LevelKind::Datasource, LevelKind::Table, LevelKind::Field];

    fn datasource(id: i64) -> Datasource {
        Datasource {
            id: id.into(),
            name: format!("ds{}", id),
            description: None,
        }
    }

    fn nodes(prefix: i64, count: i64) -> Vec<Datasource> {
        (0..count).map(|i| datasource(prefix * 100 + i)).collect()
    }

    /// Load and select the first option at every level
    fn fill(chain: &mut SelectionChain) {
        for index in 0..chain.depth() {
            let ticket = chain.begin_load(index).unwrap();
            let outcome = chain.complete_load::<_, String>(ticket, Ok(nodes(index as i64 + 1, 3)));
            assert_eq!(outcome, LoadOutcome::Applied { count: 3 });
            let id = chain.options(index)[0].id().clone();
            chain.select(index, &id).unwrap();
        }
    }

    #[test]
    fn test_select_resets_downstream_for_any_depth() {
        for depth in 1..=6 {
            let kinds: Vec<LevelKind> = (0..depth).map(|i| KINDS[i % KINDS.len()]).collect();

            for changed in 0..depth {
                let mut chain = SelectionChain::new(&kinds);
                fill(&mut chain);

                let new_id = chain.options(changed)[1].id().clone();
                let outcome = chain.select(changed, &new_id).unwrap();
                assert_eq!(
                    outcome,
                    SelectOutcome::Changed {
                        reset: depth - changed - 1
                    }
                );

                for index in 0..=changed {
                    assert_eq!(chain.state(index), Some(LevelState::Selected));
                }
                for index in changed + 1..depth {
                    let level = chain.level(index).unwrap();
                    assert_eq!(level.state(), LevelState::Empty);
                    assert!(level.options().is_empty());
                    assert!(level.selected_id().is_none());
                }
            }
        }
    }

    #[test]
    fn test_reselect_is_noop() {
        let mut chain = SelectionChain::new(&KINDS);
        fill(&mut chain);
        let before: Vec<u64> = chain.levels().iter().map(ChainLevel::generation).collect();

        let current = chain.level(0).unwrap().selected_id().unwrap().clone();
        assert_eq!(chain.select(0, &current).unwrap(), SelectOutcome::Unchanged);

        let after: Vec<u64> = chain.levels().iter().map(ChainLevel::generation).collect();
        assert_eq!(before, after);
        assert_eq!(chain.options(2).len(), 3);
        assert!(chain.selected(2).is_some());
    }

    #[test]
    fn test_superseded_load_is_discarded() {
        let mut chain = SelectionChain::new(&KINDS);
        let ticket = chain.begin_load(0).unwrap();
        chain.complete_load::<_, String>(ticket, Ok(vec![datasource(1), datasource(2)]));

        chain.select(0, &1.into()).unwrap();
        let first = chain.begin_load(1).unwrap();

        chain.select(0, &2.into()).unwrap();
        let second = chain.begin_load(1).unwrap();

        let tables = |names: &[&str]| names.iter().map(|n| Table::named(*n)).collect::<Vec<_>>();
        assert_eq!(
            chain.complete_load::<_, String>(second, Ok(tables(&["ds2_orders"]))),
            LoadOutcome::Applied { count: 1 }
        );
        assert_eq!(
            chain.complete_load::<_, String>(first, Ok(tables(&["ds1_users", "ds1_items"]))),
            LoadOutcome::Stale
        );

        let names: Vec<String> = chain.options(1).iter().map(ResourceNode::label).collect();
        assert_eq!(names, vec!["ds2_orders".to_string()]);
    }

    #[test]
    fn test_reset_invalidates_in_flight_load() {
        let mut chain = SelectionChain::new(&KINDS);
        let ticket = chain.begin_load(0).unwrap();
        chain.reset_from(0);

        assert_eq!(
            chain.complete_load::<_, String>(ticket, Ok(vec![datasource(1)])),
            LoadOutcome::Stale
        );
        assert_eq!(chain.state(0), Some(LevelState::Empty));
        assert!(!chain.is_loading());
    }

    #[test]
    fn test_empty_and_failed_loads() {
        let mut chain = SelectionChain::new(&KINDS);
        let ticket = chain.begin_load(0).unwrap();
        assert!(chain.is_loading());
        assert_eq!(
            chain.complete_load::<Datasource, String>(ticket, Ok(vec![])),
            LoadOutcome::Empty
        );
        assert_eq!(chain.state(0), Some(LevelState::Loaded));
        assert!(matches!(
            chain.select(0, &1.into()),
            Err(SelectionError::UnknownOption { .. })
        ));

        let ticket = chain.begin_load(0).unwrap();
        let outcome =
            chain.complete_load::<Datasource, _>(ticket, Err("connection refused".to_string()));
        assert_eq!(outcome, LoadOutcome::Failed("connection refused".to_string()));
        assert_eq!(chain.state(0), Some(LevelState::Empty));
        assert_eq!(chain.level(0).unwrap().last_error(), Some("connection refused"));
    }

    #[test]
    fn test_select_requires_loaded_level() {
        let mut chain = SelectionChain::new(&KINDS);
        let err = chain.select(1, &1.into()).unwrap_err();
        assert_eq!(
            err,
            SelectionError::NotSelectable {
                kind: LevelKind::Table,
                state: LevelState::Empty
            }
        );
        assert!(WorkflowError::from(err).is_validation());
        assert_eq!(chain.select(7, &1.into()), Err(SelectionError::NoSuchLevel(7)));
    }

    #[test]
    fn test_field_level_accepts_fields() {
        let mut chain = SelectionChain::new(&KINDS);
        let index = chain.index_of(LevelKind::Field).unwrap();
        let ticket = chain.begin_load(index).unwrap();
        let field = Field {
            id: "amount".into(),
            name: "amount".to_string(),
            field_type: "decimal".to_string(),
            is_primary: false,
            description: Some("金额".to_string()),
        };
        chain.complete_load::<_, String>(ticket, Ok(vec![field.clone()]));

        assert_eq!(chain.options(index)[0].as_field(), Some(&field));
    }
}
