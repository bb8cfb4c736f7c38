//! Iteration storage and memoized resolution
//!
//! The repository owns every iteration, the tree connecting them and a
//! cache of resolved outputs keyed by `(iteration, view)`. Any mutation
//! marks the iteration and all of its descendants stale in both views;
//! stale entries are recomputed lazily on the next `get_risk_segments`.
//! Ancestors are always resolved through their edited view.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use super::autoband::{
    create_auto_bands, create_double_var_bands, AutoBandSettings, BandingInput, SegmentLimits,
};
use super::config::EngineConfig;
use super::data::{DataProvider, Variable, VariableType};
use super::error::{EngineError, EngineResult};
use super::filters::{FilterProvider, FilterSet};
use super::graph::IterationGraph;
use super::grid::RiskSegmentGrid;
use super::groups::Group;
use super::ids::IterationId;
use super::iteration::{default_groups, Iteration};
use super::metrics::{
    metric_grids, metric_range, required_columns, Metric, MetricGrid, MetricProvider, SegmentMetric, StandardMetrics,
};
use super::notify::{ChangeEvent, ChangeNotifier, Recomputable};
use super::output::IterationOutput;
use super::risk_segments::{ColorKind, LossRateType, RiskSegmentDetails};
use super::scalars::{PortfolioScalar, ScalarProvider, StaticScalars};

/// Which version of an iteration's groups to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum View {
    Default,
    Edited,
}

impl View {
    pub fn from_default(default: bool) -> Self {
        if default {
            View::Default
        } else {
            View::Edited
        }
    }

    pub fn is_default(self) -> bool {
        self == View::Default
    }
}

/// Parameters for a new iteration
#[derive(Debug, Clone, PartialEq)]
pub struct NewIteration {
    pub name: String,
    pub variable: String,
    pub variable_type: VariableType,
    pub loss_rate: LossRateType,
    /// Derive the groups with auto-banding instead of an even split
    pub auto_band: bool,
    /// Restrict a root to these risk segments of the base table
    pub segments: Option<Vec<usize>>,
    /// Filter ids restricting the rows of a root
    pub filters: Vec<String>,
    /// Smooth and collapse the auto-banded grid of a double-variable iteration
    pub rank_order: bool,
}

impl NewIteration {
    pub fn new(variable: impl Into<String>, variable_type: VariableType) -> Self {
        let variable = variable.into();
        Self {
            name: variable.clone(),
            variable,
            variable_type,
            loss_rate: LossRateType::default(),
            auto_band: false,
            segments: None,
            filters: Vec::new(),
            rank_order: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn loss_rate(mut self, loss_rate: LossRateType) -> Self {
        self.loss_rate = loss_rate;
        self
    }

    pub fn auto_band(mut self, rank_order: bool) -> Self {
        self.auto_band = true;
        self.rank_order = rank_order;
        self
    }

    pub fn segments(mut self, segments: Vec<usize>) -> Self {
        self.segments = Some(segments);
        self
    }

    pub fn filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }
}

/// Plain-data snapshot of a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub iterations: Vec<serde_json::Value>,
    pub connections: BTreeMap<u64, Vec<u64>>,
    pub next_id: u64,
    pub risk_segment_details: RiskSegmentDetails,
    #[serde(default)]
    pub filters: FilterSet,
}

pub struct IterationsRepository {
    config: EngineConfig,
    data: Box<dyn DataProvider>,
    filters: FilterSet,
    scalars: Box<dyn ScalarProvider>,
    metrics: Box<dyn MetricProvider>,
    base_details: RiskSegmentDetails,
    iterations: BTreeMap<u64, Iteration>,
    graph: IterationGraph,
    cache: HashMap<(u64, View), Arc<IterationOutput>>,
    dirty: HashSet<(u64, View)>,
    notifier: ChangeNotifier,
    next_id: u64,
}

impl IterationsRepository {
    pub fn new(config: EngineConfig, data: Box<dyn DataProvider>) -> EngineResult<Self> {
        config.validate()?;
        let base_details = config.risk_segment_details()?;
        let scalars = StaticScalars::new()
            .with(LossRateType::Dlr, PortfolioScalar::default())
            .with(LossRateType::Ulr, PortfolioScalar::default());
        let metrics = StandardMetrics::new(&config.loss_rates);
        Ok(Self {
            config,
            data,
            filters: FilterSet::new(),
            scalars: Box::new(scalars),
            metrics: Box::new(metrics),
            base_details,
            iterations: BTreeMap::new(),
            graph: IterationGraph::new(),
            cache: HashMap::new(),
            dirty: HashSet::new(),
            notifier: ChangeNotifier::new(),
            next_id: 1,
        })
    }

    pub fn with_scalars(mut self, scalars: Box<dyn ScalarProvider>) -> Self {
        self.scalars = scalars;
        self
    }

    pub fn with_metrics(mut self, metrics: Box<dyn MetricProvider>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn data(&self) -> &dyn DataProvider {
        self.data.as_ref()
    }

    /// Every metric the repository evaluates, keyed by id
    pub fn metric_definitions(&self) -> BTreeMap<String, Arc<dyn Metric>> {
        self.metrics.get_all_metrics()
    }

    pub fn graph(&self) -> &IterationGraph {
        &self.graph
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Define (or redefine) a filter; the column must exist
    pub fn define_filter(&mut self, id: &str, text: &str) -> EngineResult<()> {
        self.filters.define_checked(id, text, self.data.as_ref())?;
        let affected: Vec<u64> = self
            .iterations
            .values()
            .filter(|it| it.filters.iter().any(|f| f == id))
            .filter_map(|it| it.id.real())
            .collect();
        for id in affected {
            self.invalidate_subtree(id);
        }
        Ok(())
    }

    pub fn base_risk_segment_details(&self) -> &RiskSegmentDetails {
        &self.base_details
    }

    /// Replace the shared table that new roots copy from. Existing roots
    /// keep their own copy until `update_rs_details` syncs them.
    pub fn set_base_risk_segment_details(&mut self, details: RiskSegmentDetails) {
        self.base_details = details;
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener);
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn ids(&self) -> Vec<IterationId> {
        self.iterations.keys().map(|&k| IterationId::Real(k)).collect()
    }

    pub fn iterations(&self) -> impl Iterator<Item = &Iteration> {
        self.iterations.values()
    }

    fn key(&self, id: IterationId) -> EngineResult<u64> {
        let key = id.real().ok_or(EngineError::InvalidId(id))?;
        if !self.iterations.contains_key(&key) {
            return Err(EngineError::UnknownIteration(id));
        }
        Ok(key)
    }

    pub fn iteration(&self, id: IterationId) -> EngineResult<&Iteration> {
        let key = self.key(id)?;
        Ok(&self.iterations[&key])
    }

    /// Risk segment table of the tree `id` belongs to
    pub fn risk_segment_details(&self, id: IterationId) -> EngineResult<&RiskSegmentDetails> {
        let key = self.key(id)?;
        let root = self.graph.get_root_iter_id(key);
        let root_iteration = self
            .iterations
            .get(&root)
            .ok_or(EngineError::UnknownIteration(IterationId::Real(root)))?;
        root_iteration
            .risk_segment_details()
            .ok_or(EngineError::WrongIterationKind {
                iteration: IterationId::Real(root),
                expected: "single-variable",
            })
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn load_variable(&self, name: &str, kind: VariableType) -> EngineResult<Variable> {
        let variable = self.data.load_column(name, kind)?;
        if let Some(categories) = variable.categories() {
            if categories.len() > self.config.max_categorical_cardinality {
                return Err(EngineError::CardinalityExceeded {
                    column: name.to_string(),
                    found: categories.len(),
                    max: self.config.max_categorical_cardinality,
                });
            }
        }
        Ok(variable)
    }

    /// Loss numerator and denominator, with rows outside `mask` blanked
    fn load_losses(
        &self,
        loss_rate: LossRateType,
        mask: Option<&[bool]>,
    ) -> EngineResult<(Vec<Option<f64>>, Vec<Option<f64>>)> {
        let columns = self.config.loss_rates.get(loss_rate);
        let mut loaded = Vec::with_capacity(2);
        for name in [&columns.numerator, &columns.denominator] {
            let variable = self.data.load_column(name, VariableType::Numerical)?;
            let mut values = variable.as_numeric().map(|v| v.to_vec()).unwrap_or_default();
            if let Some(mask) = mask {
                for (value, keep) in values.iter_mut().zip(mask) {
                    if !keep {
                        *value = None;
                    }
                }
            }
            loaded.push(values);
        }
        let denominator = loaded.pop().unwrap_or_default();
        let numerator = loaded.pop().unwrap_or_default();
        Ok((numerator, denominator))
    }

    fn band_settings(&self, loss_rate: LossRateType) -> EngineResult<AutoBandSettings> {
        let scalar = self.scalars.get_scalar(loss_rate)?;
        Ok(AutoBandSettings::from_config(
            &self.config,
            loss_rate,
            scalar.portfolio_scalar(),
        ))
    }

    /// Create a root iteration and return its id
    pub fn add_single_var_iteration(&mut self, request: NewIteration) -> EngineResult<IterationId> {
        let variable = self.load_variable(&request.variable, request.variable_type)?;
        let details = match &request.segments {
            Some(segments) => self.base_details.subset(segments)?,
            None => self.base_details.clone(),
        };
        let mask = if request.filters.is_empty() {
            None
        } else {
            Some(self.filters.get_mask(self.data.as_ref(), &request.filters)?)
        };

        let groups = if request.auto_band {
            let (numerator, denominator) = self.load_losses(request.loss_rate, mask.as_deref())?;
            let input = BandingInput::new(&variable, &numerator, &denominator)?;
            let settings = self.band_settings(request.loss_rate)?;
            create_auto_bands(&input, &details, &settings)?
        } else {
            default_groups(&variable, &details.indices())
        };

        let key = self.allocate_id();
        let id = IterationId::Real(key);
        let iteration = Iteration::new_single(id, &request.name, &variable, request.loss_rate, groups, details)
            .with_filters(request.filters);
        self.graph.add_root(key)?;
        self.iterations.insert(key, iteration);
        self.mark_dirty(key);

        log::info!(
            "Added single-variable iteration {} on '{}'{}",
            id,
            request.variable,
            if request.auto_band { " (auto-banded)" } else { "" }
        );
        self.notifier.notify(&ChangeEvent::Added(id));
        Ok(id)
    }

    /// Create a child of `parent` that refines its risk segments
    pub fn add_double_var_iteration(&mut self, parent: IterationId, request: NewIteration) -> EngineResult<IterationId> {
        let parent_key = self.key(parent)?;
        if !self.iterations[&parent_key].active {
            return Err(EngineError::InactiveIteration(parent));
        }
        let max = self.config.max_iteration_depth;
        if self.graph.iteration_depth(parent_key) + 1 > max {
            return Err(EngineError::DepthExceeded { parent, max });
        }

        let variable = self.load_variable(&request.variable, request.variable_type)?;
        let details = self.risk_segment_details(parent)?.clone();

        let (groups, grid): (BTreeMap<usize, Group>, RiskSegmentGrid) = if request.auto_band {
            let previous = self.get_risk_segments(parent, false)?;
            let (numerator, denominator) = self.load_losses(request.loss_rate, None)?;
            let input = BandingInput::new(&variable, &numerator, &denominator)?;
            let settings = self.band_settings(request.loss_rate)?;
            let limits = SegmentLimits::new(self.config.upgrade_limit, self.config.downgrade_limit);
            let result =
                create_double_var_bands(&input, &previous, &details, &settings, limits, request.rank_order)?;
            (result.groups, result.grid)
        } else {
            let keys: Vec<usize> = (0..details.len()).collect();
            let groups = default_groups(&variable, &keys);
            let grid = RiskSegmentGrid::identity(groups.keys().copied().collect(), details.indices());
            (groups, grid)
        };

        let key = self.allocate_id();
        let id = IterationId::Real(key);
        let iteration = Iteration::new_double(id, &request.name, &variable, request.loss_rate, groups, grid);
        self.graph.add_child(parent_key, key)?;
        self.iterations.insert(key, iteration);
        self.mark_dirty(key);

        log::info!("Added double-variable iteration {} on '{}' below {}", id, request.variable, parent);
        self.notifier.notify(&ChangeEvent::Added(id));
        Ok(id)
    }

    /// Delete an iteration and its subtree; returns every removed id
    pub fn delete_iteration(&mut self, id: IterationId) -> EngineResult<Vec<IterationId>> {
        let key = self.key(id)?;
        let removed = self.graph.remove(key)?;
        for node in &removed {
            self.iterations.remove(node);
            for view in [View::Default, View::Edited] {
                self.cache.remove(&(*node, view));
                self.dirty.remove(&(*node, view));
            }
        }
        let removed: Vec<IterationId> = removed.into_iter().map(IterationId::Real).collect();
        log::info!("Deleted {} iteration(s) starting at {}", removed.len(), id);
        self.notifier.notify(&ChangeEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    fn mark_dirty(&mut self, key: u64) {
        self.dirty.insert((key, View::Default));
        self.dirty.insert((key, View::Edited));
    }

    fn invalidate_subtree(&mut self, key: u64) {
        self.mark_dirty(key);
        for node in self.graph.get_descendants(key) {
            self.mark_dirty(node);
        }
    }

    /// Mark `id` and all of its descendants for recomputation
    pub fn add_to_calculation_queue(&mut self, id: IterationId) -> EngineResult<()> {
        let key = self.key(id)?;
        self.invalidate_subtree(key);
        log::debug!("Queued {} and its descendants for recalculation", id);
        Ok(())
    }

    /// Whether the cached output for `id` is stale or missing
    pub fn is_dirty(&self, id: IterationId, default: bool) -> bool {
        let Some(key) = id.real() else {
            return true;
        };
        let cache_key = (key, View::from_default(default));
        self.dirty.contains(&cache_key) || !self.cache.contains_key(&cache_key)
    }

    /// Apply `edit` to one iteration, then invalidate and notify
    fn mutate<T, F>(&mut self, id: IterationId, edit: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Iteration) -> EngineResult<T>,
    {
        let key = self.key(id)?;
        let iteration = self
            .iterations
            .get_mut(&key)
            .ok_or(EngineError::UnknownIteration(id))?;
        let result = edit(iteration)?;
        self.invalidate_subtree(key);
        self.notifier.notify(&ChangeEvent::Updated(id));
        Ok(result)
    }

    pub fn select_groups(&mut self, id: IterationId, indices: &[usize]) -> EngineResult<()> {
        self.mutate(id, |it| it.select_groups(indices))
    }

    pub fn add_new_group(&mut self, id: IterationId) -> EngineResult<usize> {
        self.mutate(id, |it| it.add_new_group())
    }

    pub fn remove_group(&mut self, id: IterationId, index: usize) -> EngineResult<()> {
        self.mutate(id, |it| it.remove_group(index))
    }

    /// Edit a group's bounds or members; returns whether anything changed
    pub fn set_controls(
        &mut self,
        id: IterationId,
        index: usize,
        lower: Option<f64>,
        upper: Option<f64>,
        categories: Option<BTreeSet<String>>,
    ) -> EngineResult<bool> {
        self.mutate(id, |it| it.set_group(index, lower, upper, categories))
    }

    pub fn set_risk_segment_grid(&mut self, id: IterationId, cells: Vec<Vec<usize>>) -> EngineResult<()> {
        let details = self.risk_segment_details(id)?.clone();
        self.mutate(id, |it| it.set_risk_segment_grid(cells, &details))
    }

    pub fn reset_to_default(&mut self, id: IterationId) -> EngineResult<()> {
        self.mutate(id, |it| {
            it.reset_to_default();
            Ok(())
        })
    }

    pub fn update_maf(&mut self, id: IterationId, loss_rate: LossRateType, values: &[f64]) -> EngineResult<()> {
        self.mutate(id, |it| it.update_maf(loss_rate, values))
    }

    pub fn update_color(&mut self, id: IterationId, kind: ColorKind, values: &[String]) -> EngineResult<()> {
        self.mutate(id, |it| it.update_color(kind, values))
    }

    /// Re-apply colors and MAFs from the base table to a root.
    ///
    /// Segment identity and rate bounds are left alone. Returns whether the
    /// root had diverged; only then is its subtree invalidated.
    pub fn update_rs_details(&mut self, id: IterationId) -> EngineResult<bool> {
        let key = self.key(id)?;
        let source = self.base_details.clone();
        let iteration = self
            .iterations
            .get_mut(&key)
            .ok_or(EngineError::UnknownIteration(id))?;
        let changed = iteration.sync_risk_segment_details(&source)?;
        if changed {
            self.invalidate_subtree(key);
            self.notifier.notify(&ChangeEvent::Updated(id));
        }
        Ok(changed)
    }

    /// Resolve `id` to risk segments, reusing the cached output when fresh.
    ///
    /// Outputs carrying validation errors are returned but never cached.
    pub fn get_risk_segments(&mut self, id: IterationId, default: bool) -> EngineResult<Arc<IterationOutput>> {
        let key = self.key(id)?;
        self.resolve_key(key, View::from_default(default))
    }

    fn resolve_key(&mut self, key: u64, view: View) -> EngineResult<Arc<IterationOutput>> {
        let id = IterationId::Real(key);
        let iteration = self.iterations.get(&key).ok_or(EngineError::UnknownIteration(id))?;
        if !iteration.active {
            return Err(EngineError::InactiveIteration(id));
        }
        if !self.dirty.contains(&(key, view)) {
            if let Some(cached) = self.cache.get(&(key, view)) {
                return Ok(Arc::clone(cached));
            }
        }

        let previous = match self.graph.get_parent(key) {
            Some(parent) => Some(self.resolve_key(parent, View::Edited)?),
            None => None,
        };
        let details = self.risk_segment_details(id)?.clone();
        let iteration = &self.iterations[&key];
        let variable = self.data.load_column(&iteration.variable, iteration.variable_type)?;
        let mut output = iteration.get_risk_segments(
            &variable,
            previous.as_deref(),
            &details,
            view.is_default(),
            self.config.uncovered_values_preview,
        )?;

        if !iteration.filters.is_empty() {
            let mask = self.filters.get_mask(self.data.as_ref(), &iteration.filters)?;
            for (value, keep) in output.values.iter_mut().zip(mask) {
                if !keep {
                    *value = None;
                }
            }
        }

        log::debug!(
            "Resolved {} ({:?}): {} unmapped row(s), {} warning(s), {} error(s)",
            id,
            view,
            output.unmapped_count(),
            output.warnings.len(),
            output.errors.len()
        );

        let output = Arc::new(output);
        self.dirty.remove(&(key, view));
        if output.is_valid() {
            self.cache.insert((key, view), Arc::clone(&output));
        } else {
            self.cache.remove(&(key, view));
        }
        Ok(output)
    }

    /// Deactivate iterations whose variable disappeared from the data and
    /// reactivate those whose variable is back. Returns the changed ids.
    pub fn refresh_data(&mut self) -> Vec<IterationId> {
        let mut changed = Vec::new();
        let keys: Vec<u64> = self.iterations.keys().copied().collect();
        for key in keys {
            let iteration = &self.iterations[&key];
            let available = self.data.has_column(&iteration.variable, iteration.variable_type);
            if available == iteration.active {
                continue;
            }
            if let Some(iteration) = self.iterations.get_mut(&key) {
                iteration.active = available;
            }
            let id = IterationId::Real(key);
            let event = if available {
                log::info!("Iteration {} reactivated", id);
                ChangeEvent::Reactivated(id)
            } else {
                log::warn!("Iteration {} deactivated: its variable is no longer available", id);
                ChangeEvent::Deactivated(id)
            };
            self.invalidate_subtree(key);
            self.notifier.notify(&event);
            changed.push(id);
        }
        changed
    }

    /// Swap the data source; every output is recomputed on next use
    pub fn replace_data(&mut self, data: Box<dyn DataProvider>) -> Vec<IterationId> {
        self.data = data;
        let keys: Vec<u64> = self.iterations.keys().copied().collect();
        for key in keys {
            self.mark_dirty(key);
        }
        self.refresh_data()
    }

    fn metric_frame(&self, id: IterationId) -> EngineResult<(DataFrame, BTreeMap<String, Arc<dyn Metric>>)> {
        let iteration = self.iteration(id)?;
        let metrics = self.metrics.get_all_metrics();
        let mut columns = required_columns(&metrics);
        if !columns.contains(&iteration.variable) {
            columns.push(iteration.variable.clone());
        }
        let frame = self.data.load_columns(&columns)?;
        Ok((frame, metrics))
    }

    /// Every metric per resolved risk segment of `id`
    pub fn get_metric_range(&mut self, id: IterationId, default: bool) -> EngineResult<Vec<SegmentMetric>> {
        let output = self.get_risk_segments(id, default)?;
        let details = self.risk_segment_details(id)?;
        let (frame, metrics) = self.metric_frame(id)?;
        metric_range(&frame, &output, details, &metrics)
    }

    /// Every metric per (group, parent segment) cell of a double-variable iteration
    pub fn get_metric_grids(&mut self, id: IterationId, default: bool) -> EngineResult<Vec<MetricGrid>> {
        let key = self.key(id)?;
        let parent = self.graph.get_parent(key).ok_or(EngineError::WrongIterationKind {
            iteration: id,
            expected: "double-variable",
        })?;
        let previous = self.resolve_key(parent, View::Edited)?;
        let iteration = &self.iterations[&key];
        let variable = self.data.load_column(&iteration.variable, iteration.variable_type)?;
        let groups = iteration.get_group_mapping(&variable, default, self.config.uncovered_values_preview);
        let (frame, metrics) = self.metric_frame(id)?;
        metric_grids(&frame, &groups, &previous, &metrics)
    }

    /// Snapshot iterations, tree, filters and base table
    pub fn to_session(&self) -> EngineResult<Session> {
        let iterations = self
            .iterations
            .values()
            .map(Iteration::to_dict)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Session {
            iterations,
            connections: self.graph.connections().clone(),
            next_id: self.next_id,
            risk_segment_details: self.base_details.clone(),
            filters: self.filters.clone(),
        })
    }

    /// Rebuild a repository from a snapshot; iterations whose variable is
    /// missing from `data` come back inactive.
    pub fn from_session(session: Session, config: EngineConfig, data: Box<dyn DataProvider>) -> EngineResult<Self> {
        let mut repository = Self::new(config, data)?;
        repository.base_details = session.risk_segment_details;
        repository.filters = session.filters;

        for value in session.iterations {
            let iteration = Iteration::from_dict(value)?;
            let key = iteration.id.real().ok_or(EngineError::InvalidId(iteration.id))?;
            if repository.iterations.insert(key, iteration).is_some() {
                return Err(EngineError::DuplicateIteration(IterationId::Real(key)));
            }
        }

        let children: BTreeSet<u64> = session.connections.values().flatten().copied().collect();
        let mut queue: Vec<u64> = session
            .connections
            .keys()
            .copied()
            .filter(|k| !children.contains(k))
            .collect();
        for &root in &queue {
            repository.graph.add_root(root)?;
        }
        while let Some(node) = queue.pop() {
            for &child in session.connections.get(&node).into_iter().flatten() {
                repository.graph.add_child(node, child)?;
                queue.push(child);
            }
        }
        if let Some(&missing) = repository.iterations.keys().find(|k| !repository.graph.contains(**k)) {
            return Err(EngineError::UnknownIteration(IterationId::Real(missing)));
        }
        if let Some(&stray) = session.connections.keys().find(|k| !repository.iterations.contains_key(*k)) {
            return Err(EngineError::UnknownIteration(IterationId::Real(stray)));
        }

        let highest = repository.iterations.keys().max().copied().unwrap_or(0);
        repository.next_id = session.next_id.max(highest + 1);
        let keys: Vec<u64> = repository.iterations.keys().copied().collect();
        for key in keys {
            repository.mark_dirty(key);
        }
        repository.refresh_data();
        log::info!("Restored session with {} iteration(s)", repository.len());
        Ok(repository)
    }
}

impl Recomputable for IterationsRepository {
    fn invalidate(&mut self, id: IterationId) -> EngineResult<()> {
        self.add_to_calculation_queue(id)
    }

    fn resolve(&mut self, id: IterationId, default: bool) -> EngineResult<Arc<IterationOutput>> {
        self.get_risk_segments(id, default)
    }
}

impl std::fmt::Debug for IterationsRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationsRepository")
            .field("iterations", &self.iterations.len())
            .field("cached", &self.cache.len())
            .field("dirty", &self.dirty.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::data::FrameDataProvider;
    use polars::prelude::*;

    fn repository() -> IterationsRepository {
        let score: Vec<f64> = (0..20).map(|v| v as f64).collect();
        let frame = df! {
            "score" => score,
            "balance" => vec![100.0f64; 20],
        }
        .unwrap();
        let data = FrameDataProvider::from_frame("main", frame).unwrap();
        IterationsRepository::new(EngineConfig::default(), Box::new(data)).unwrap()
    }

    #[test]
    fn test_cache_hit_returns_same_output() {
        let mut repo = repository();
        let id = repo
            .add_single_var_iteration(NewIteration::new("score", VariableType::Numerical))
            .unwrap();
        let first = repo.get_risk_segments(id, false).unwrap();
        let second = repo.get_risk_segments(id, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!repo.is_dirty(id, false));
    }

    #[test]
    fn test_mutation_invalidates() {
        let mut repo = repository();
        let id = repo
            .add_single_var_iteration(NewIteration::new("score", VariableType::Numerical))
            .unwrap();
        let before = repo.get_risk_segments(id, false).unwrap();
        repo.add_to_calculation_queue(id).unwrap();
        assert!(repo.is_dirty(id, true));
        let after = repo.get_risk_segments(id, false).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let mut repo = repository();
        assert!(matches!(
            repo.get_risk_segments(IterationId::Temporary, false),
            Err(EngineError::InvalidId(_))
        ));
        assert!(matches!(
            repo.get_risk_segments(IterationId::Real(9), false),
            Err(EngineError::UnknownIteration(_))
        ));
    }
}
