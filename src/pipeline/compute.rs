//! Per-node evaluation of a term graph
//!
//! Node `n` produces `n_out + extra_rows(n)` rows. Its first row sits at
//! absolute row `max_extra - extra_rows(n)` of the run's session axis, so a
//! node's array always ends on the last requested session. Windowed kinds
//! read trailing windows of their inputs; every other kind reads its inputs
//! row-aligned.

use crate::data::label_array::LabelArray;
use crate::error::{PipelineError, Result};
use crate::pipeline::array::TermArray;
use crate::pipeline::dataset::Column;
use crate::pipeline::dtype::Scalar;
use crate::pipeline::graph::{NodeId, TermGraph};
use crate::pipeline::loader::LoadedColumn;
use crate::pipeline::normalize::grouped_row_transform;
use crate::pipeline::quantiles::{interpolated_quantile, quantiles};
use crate::pipeline::rank::{grouped_masked_is_maximal, grouped_masked_rankdata_2d, masked_rankdata_2d, RankMethod};
use crate::pipeline::summary::{nanmean, nansum, row_summary};
use crate::pipeline::term::{CustomKernel, LogicalOp, NullCheck, StrOp, Term, TermKind, TermRole};
use crate::types::{AssetId, Session, NAT};
use hashbrown::HashMap;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use std::sync::Arc;

/// Everything one evaluation pass reads
pub(crate) struct Evaluator<'a> {
    graph: &'a TermGraph,
    /// Session of every absolute row, lookback included
    sessions: &'a [Session],
    sids: &'a [AssetId],
    /// Root mask over `sessions` x `sids`
    root_mask: ArrayView2<'a, bool>,
    columns: &'a HashMap<Column, LoadedColumn>,
    initial: &'a HashMap<Term, TermArray>,
    max_extra: usize,
    n_out: usize,
    results: Vec<Option<TermArray>>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        graph: &'a TermGraph,
        sessions: &'a [Session],
        sids: &'a [AssetId],
        root_mask: ArrayView2<'a, bool>,
        columns: &'a HashMap<Column, LoadedColumn>,
        initial: &'a HashMap<Term, TermArray>,
    ) -> Result<Self> {
        let max_extra = graph.max_extra_rows();
        if sessions.len() <= max_extra {
            return Err(PipelineError::InvalidInput {
                term: "evaluate_terms".to_string(),
                reason: format!(
                    "{} sessions supplied but the graph needs {} rows of lookback plus at least one output row",
                    sessions.len(),
                    max_extra
                ),
            });
        }
        let expected = (sessions.len(), sids.len());
        if root_mask.dim() != expected {
            return Err(PipelineError::ShapeMismatch {
                term: "root mask".to_string(),
                expected,
                actual: root_mask.dim(),
            });
        }
        Ok(Self {
            graph,
            sessions,
            sids,
            root_mask,
            columns,
            initial,
            max_extra,
            n_out: sessions.len() - max_extra,
            results: vec![None; graph.len()],
        })
    }

    /// Evaluate every node and return the requested outputs trimmed to the output rows
    pub(crate) fn run(mut self) -> Result<Vec<TermArray>> {
        for &id in self.graph.execution_order() {
            let term = self.graph.term(id);
            if term.role() == TermRole::Column {
                continue;
            }
            log::debug!("computing {} ({} rows)", term, self.n_rows(id));
            let array = self.compute_node(id)?;
            self.results[id] = Some(array);
        }
        self.graph
            .outputs()
            .iter()
            .map(|&id| {
                let array = self.result(id)?;
                let extra = self.graph.extra_rows(id);
                Ok(array.rows(extra, extra + self.n_out))
            })
            .collect()
    }

    fn ncols(&self) -> usize {
        self.sids.len()
    }

    fn offset(&self, id: NodeId) -> usize {
        self.max_extra - self.graph.extra_rows(id)
    }

    fn n_rows(&self, id: NodeId) -> usize {
        self.n_out + self.graph.extra_rows(id)
    }

    fn result(&self, id: NodeId) -> Result<&TermArray> {
        self.results[id]
            .as_ref()
            .ok_or_else(|| PipelineError::MissingTermValue(self.graph.term(id).to_string()))
    }

    /// Rows of `dep` lined up with the rows of a node starting at absolute row `off`
    fn aligned(&self, dep: NodeId, off: usize, rows: usize) -> Result<TermArray> {
        let start = off - self.offset(dep);
        Ok(self.result(dep)?.rows(start, start + rows))
    }

    /// Root mask AND the node's own mask, over the node's rows
    fn effective_mask(&self, id: NodeId) -> Result<Array2<bool>> {
        let off = self.offset(id);
        let rows = self.n_rows(id);
        let mut mask = self.root_mask.slice(s![off..off + rows, ..]).to_owned();
        if let Some(mask_term) = self.graph.term(id).mask() {
            let mask_id = self
                .graph
                .node_id(mask_term)
                .ok_or_else(|| PipelineError::MissingTermValue(mask_term.to_string()))?;
            let own = self.aligned(mask_id, off, rows)?;
            Zip::from(&mut mask).and(own.as_bool()?).for_each(|m, &o| *m = *m && o);
        }
        Ok(mask)
    }

    /// Trailing window of `length` rows of `dep` ending at absolute row `end`
    fn window(&self, dep: NodeId, end: usize, length: usize) -> Result<TermArray> {
        let term = self.graph.term(dep);
        if term.role() == TermRole::Column {
            let column = Column::from_term(term.clone())
                .and_then(|c| self.columns.get(&c))
                .ok_or_else(|| PipelineError::NoLoader(term.to_string()))?;
            return column.window(end, length);
        }
        let last = end - self.offset(dep);
        Ok(self.result(dep)?.rows(last + 1 - length, last + 1))
    }

    fn compute_node(&self, id: NodeId) -> Result<TermArray> {
        let term = self.graph.term(id);
        let off = self.offset(id);
        let rows = self.n_rows(id);

        if let Some(supplied) = self.initial.get(term) {
            let expected = (self.sessions.len(), self.ncols());
            if supplied.shape() != expected {
                return Err(PipelineError::ShapeMismatch {
                    term: term.to_string(),
                    expected,
                    actual: supplied.shape(),
                });
            }
            let mut array = supplied.rows(off, off + rows);
            array.apply_mask(self.effective_mask(id)?.view(), term.missing_value());
            return Ok(array);
        }

        let mut array = if term.is_windowed() {
            self.compute_windowed(id)?
        } else {
            self.compute_aligned(id)?
        };

        let multi_output = term.output_names().is_some();
        if !multi_output {
            let expected = (rows, self.ncols());
            if array.shape() != expected {
                return Err(PipelineError::ShapeMismatch {
                    term: term.to_string(),
                    expected,
                    actual: array.shape(),
                });
            }
            array.apply_mask(self.effective_mask(id)?.view(), term.missing_value());
        }
        Ok(array)
    }

    fn compute_windowed(&self, id: NodeId) -> Result<TermArray> {
        let term = self.graph.term(id);
        let deps = self.graph.dependencies_of(id);
        let n_inputs = term.inputs().len();
        let inputs = &deps[..n_inputs];
        let off = self.offset(id);
        let rows = self.n_rows(id);
        let length = term.window_length();
        let ncols = self.ncols();

        if let TermKind::Custom(spec) = term.kind() {
            return self.compute_custom(id, &spec.kernel);
        }

        let windows = |t: usize| -> Result<Vec<TermArray>> {
            inputs.iter().map(|&dep| self.window(dep, off + t, length)).collect()
        };

        match term.kind() {
            TermKind::Latest | TermKind::Shift { .. } => {
                let pick = if matches!(term.kind(), TermKind::Latest) { length - 1 } else { 0 };
                let mut parts = Vec::with_capacity(rows);
                for t in 0..rows {
                    let w = self.window(inputs[0], off + t, length)?;
                    parts.push(w.rows(pick, pick + 1));
                }
                stack_rows(parts, ncols, term.missing_value())
            }
            TermKind::AllPresent => {
                let missing = self.graph.term(inputs[0]).missing_value();
                let mut out = Array2::from_elem((rows, ncols), false);
                for t in 0..rows {
                    let w = self.window(inputs[0], off + t, length)?;
                    let absent = w.missing_mask(missing);
                    for (c, col) in absent.axis_iter(Axis(1)).enumerate() {
                        out[[t, c]] = !col.iter().any(|&m| m);
                    }
                }
                Ok(TermArray::Bool(out))
            }
            TermKind::WindowAll | TermKind::WindowAny | TermKind::AtLeastN { .. } => {
                let needed = match term.kind() {
                    TermKind::WindowAll => length,
                    TermKind::AtLeastN { n } => *n,
                    _ => 1,
                };
                let mut out = Array2::from_elem((rows, ncols), false);
                for t in 0..rows {
                    let w = self.window(inputs[0], off + t, length)?;
                    for (c, col) in w.as_bool()?.axis_iter(Axis(1)).enumerate() {
                        out[[t, c]] = col.iter().filter(|&&v| v).count() >= needed;
                    }
                }
                Ok(TermArray::Bool(out))
            }
            kind => {
                let mut out = Array2::from_elem((rows, ncols), f64::NAN);
                for t in 0..rows {
                    let w = windows(t)?;
                    let first = w[0].as_float()?;
                    for c in 0..ncols {
                        out[[t, c]] = match kind {
                            TermKind::Returns { exclude_window_length } => {
                                let start = first[[0, c]];
                                (first[[length - 1 - exclude_window_length, c]] - start) / start
                            }
                            TermKind::PercentChange => {
                                let start = first[[0, c]];
                                (first[[length - 1, c]] - start) / start.abs()
                            }
                            TermKind::SimpleMovingAverage => nanmean(&first.column(c).to_vec()),
                            TermKind::ExponentialWeightedMovingAverage { decay_rate } => {
                                ewma(first.column(c), decay_rate.0)
                            }
                            TermKind::Vwap => {
                                let volume = w[1].as_float()?;
                                let traded: Vec<f64> =
                                    first.column(c).iter().zip(volume.column(c)).map(|(p, v)| p * v).collect();
                                nansum(&traded) / nansum(&volume.column(c).to_vec())
                            }
                            TermKind::AverageDollarVolume => {
                                let volume = w[1].as_float()?;
                                let traded: Vec<f64> =
                                    first.column(c).iter().zip(volume.column(c)).map(|(p, v)| p * v).collect();
                                nanmean(&traded)
                            }
                            other => {
                                return Err(PipelineError::InvalidInput {
                                    term: term.to_string(),
                                    reason: format!("{:?} is not a windowed computation", other),
                                })
                            }
                        };
                    }
                }
                Ok(TermArray::Float(out))
            }
        }
    }

    /// Custom terms see only the assets their effective mask admits each day
    fn compute_custom(&self, id: NodeId, kernel: &CustomKernel) -> Result<TermArray> {
        let term = self.graph.term(id);
        let rows = self.n_rows(id);
        let ncols = self.ncols();
        match kernel {
            CustomKernel::Factor(factor) => {
                let n_outputs = factor.outputs().len().max(1);
                let mut result = Array2::from_elem((rows, n_outputs * ncols), f64::NAN);
                self.for_each_admitted(id, |t, today, assets, windows, admitted| {
                    let shape = (n_outputs, admitted.len());
                    let mut out = Array2::from_elem(shape, f64::NAN);
                    factor.compute(today, assets, windows, &mut out)?;
                    if out.dim() != shape {
                        return Err(PipelineError::ShapeMismatch {
                            term: term.to_string(),
                            expected: shape,
                            actual: out.dim(),
                        });
                    }
                    for k in 0..n_outputs {
                        for (j, &c) in admitted.iter().enumerate() {
                            result[[t, k * ncols + c]] = out[[k, j]];
                        }
                    }
                    Ok(())
                })?;
                Ok(TermArray::Float(result))
            }
            CustomKernel::Filter(filter) => {
                let mut result = Array2::from_elem((rows, ncols), false);
                self.for_each_admitted(id, |t, today, assets, windows, admitted| {
                    let mut out = Array1::from_elem(admitted.len(), false);
                    filter.compute(today, assets, windows, &mut out)?;
                    self.check_custom_len(term, admitted.len(), out.len())?;
                    for (j, &c) in admitted.iter().enumerate() {
                        result[[t, c]] = out[j];
                    }
                    Ok(())
                })?;
                Ok(TermArray::Bool(result))
            }
            CustomKernel::Classifier(classifier) => {
                let missing = classifier.missing_value();
                let mut result = Array2::from_elem((rows, ncols), missing);
                self.for_each_admitted(id, |t, today, assets, windows, admitted| {
                    let mut out = Array1::from_elem(admitted.len(), missing);
                    classifier.compute(today, assets, windows, &mut out)?;
                    self.check_custom_len(term, admitted.len(), out.len())?;
                    for (j, &c) in admitted.iter().enumerate() {
                        result[[t, c]] = out[j];
                    }
                    Ok(())
                })?;
                Ok(TermArray::Int(result))
            }
        }
    }

    /// Call `body(row, session, assets, windows, columns)` for every row with
    /// at least one admitted asset; windows hold only the admitted columns
    fn for_each_admitted<F>(&self, id: NodeId, mut body: F) -> Result<()>
    where
        F: FnMut(usize, Session, &[AssetId], &[TermArray], &[usize]) -> Result<()>,
    {
        let term = self.graph.term(id);
        let deps = &self.graph.dependencies_of(id)[..term.inputs().len()];
        let off = self.offset(id);
        let length = term.window_length();
        let mask = self.effective_mask(id)?;

        for t in 0..self.n_rows(id) {
            let admitted: Vec<usize> = (0..self.ncols()).filter(|&c| mask[[t, c]]).collect();
            if admitted.is_empty() {
                continue;
            }
            let assets: Vec<AssetId> = admitted.iter().map(|&c| self.sids[c]).collect();
            let windows = deps
                .iter()
                .map(|&dep| gather_columns(&self.window(dep, off + t, length)?, &admitted))
                .collect::<Result<Vec<_>>>()?;
            body(t, self.sessions[off + t], &assets, &windows, &admitted)?;
        }
        Ok(())
    }

    fn check_custom_len(&self, term: &Term, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(PipelineError::ShapeMismatch {
                term: term.to_string(),
                expected: (1, expected),
                actual: (1, actual),
            })
        }
    }

    fn compute_aligned(&self, id: NodeId) -> Result<TermArray> {
        let term = self.graph.term(id);
        let deps = self.graph.dependencies_of(id);
        let off = self.offset(id);
        let rows = self.n_rows(id);
        let ncols = self.ncols();
        let shape = (rows, ncols);
        let input = |k: usize| self.aligned(deps[k], off, rows);
        let input_missing = |k: usize| self.graph.term(deps[k]).missing_value();

        Ok(match term.kind() {
            TermKind::External { .. } => return Err(PipelineError::MissingTermValue(term.to_string())),
            TermKind::Constant(value) => TermArray::full(shape, value, term.missing_value()),
            TermKind::Everything => TermArray::Int(Array2::zeros(shape)),
            TermKind::StaticAssets(assets) => {
                let row: Vec<bool> = self.sids.iter().map(|s| assets.binary_search(s).is_ok()).collect();
                TermArray::Bool(Array2::from_shape_fn(shape, |(_, c)| row[c]))
            }
            TermKind::Output { index, .. } => {
                let parent = self.aligned(deps[0], off, rows)?;
                parent.columns(index * ncols, (index + 1) * ncols)?
            }
            TermKind::Rank { method, ascending } => {
                let data = input(0)?;
                let mut valid = self.effective_mask(id)?;
                and_not(&mut valid, &data.missing_mask(input_missing(0)));
                let groups = self.group_keys(deps, term.inputs().len(), 1, off, rows, &mut valid)?;
                let ranks = match &data {
                    TermArray::Float(a) => rank_any(a.view(), valid.view(), groups.as_ref(), *method, *ascending),
                    TermArray::Int(a) | TermArray::Datetime(a) => {
                        rank_any(a.view(), valid.view(), groups.as_ref(), *method, *ascending)
                    }
                    other => {
                        return Err(PipelineError::TypeMismatch {
                            context: format!("rank input of {}", term),
                            expected: "float64, int64 or datetime64[ns]".to_string(),
                            actual: other.dtype().to_string(),
                        })
                    }
                };
                TermArray::Float(ranks)
            }
            TermKind::GroupedTransform(op) => {
                let data = input(0)?;
                let values = data.as_float()?;
                let mut valid = self.effective_mask(id)?;
                and_not(&mut valid, &values.mapv(f64::is_nan));
                let groups = self.group_keys(deps, term.inputs().len(), 1, off, rows, &mut valid)?;
                TermArray::Float(grouped_row_transform(
                    values.view(),
                    valid.view(),
                    groups.as_ref().map(|g| g.view()),
                    *op,
                ))
            }
            TermKind::Quantiles { bins } => {
                let values = to_f64(&input(0)?, input_missing(0))?;
                let valid = self.effective_mask(id)?;
                TermArray::Int(quantiles(values.view(), valid.view(), *bins))
            }
            TermKind::Summary(func) => {
                let data = input(0)?;
                let values = data.as_float()?;
                let valid = self.effective_mask(id)?;
                let reduced = row_summary(values.view(), valid.view(), *func);
                TermArray::Float(Array2::from_shape_fn(shape, |(r, _)| reduced[r]))
            }
            TermKind::PercentileBetween { min, max } => {
                let data = input(0)?;
                let values = data.as_float()?;
                let valid = self.effective_mask(id)?;
                let mut out = Array2::from_elem(shape, false);
                for r in 0..rows {
                    let mut present: Vec<f64> = (0..ncols)
                        .filter(|&c| valid[[r, c]] && !values[[r, c]].is_nan())
                        .map(|c| values[[r, c]])
                        .collect();
                    if present.is_empty() {
                        continue;
                    }
                    present.sort_by(f64::total_cmp);
                    let lower = interpolated_quantile(&present, min.0 / 100.0);
                    let upper = interpolated_quantile(&present, max.0 / 100.0);
                    for c in 0..ncols {
                        let v = values[[r, c]];
                        out[[r, c]] = valid[[r, c]] && v >= lower && v <= upper;
                    }
                }
                TermArray::Bool(out)
            }
            TermKind::Arithmetic(op) => {
                let (lhs, rhs) = (input(0)?, input(1)?);
                let mut out = lhs.as_float()?.clone();
                Zip::from(&mut out).and(rhs.as_float()?).for_each(|a, &b| *a = op.apply(*a, b));
                TermArray::Float(out)
            }
            TermKind::Negate => TermArray::Float(input(0)?.as_float()?.mapv(|v| -v)),
            TermKind::Abs => TermArray::Float(input(0)?.as_float()?.mapv(f64::abs)),
            TermKind::AsFactor => TermArray::Float(input(0)?.as_bool()?.mapv(|v| if v { 1.0 } else { 0.0 })),
            TermKind::Maximum => {
                let data = input(0)?;
                let values = data.as_float()?;
                let mut valid = self.effective_mask(id)?;
                and_not(&mut valid, &values.mapv(f64::is_nan));
                let groups = self.group_keys(deps, term.inputs().len(), 1, off, rows, &mut valid)?;
                TermArray::Bool(grouped_masked_is_maximal(
                    values.view(),
                    valid.view(),
                    groups.as_ref().map(|g| g.view()),
                ))
            }
            TermKind::Compare(op) => {
                let lhs = to_f64(&input(0)?, input_missing(0))?;
                let rhs = to_f64(&input(1)?, input_missing(1))?;
                let mut out = Array2::from_elem(shape, false);
                Zip::from(&mut out).and(&lhs).and(&rhs).for_each(|o, &a, &b| {
                    *o = !a.is_nan() && !b.is_nan() && op.apply(a, b);
                });
                TermArray::Bool(out)
            }
            TermKind::Logical(op) => {
                let lhs = input(0)?;
                let a = lhs.as_bool()?;
                TermArray::Bool(match op {
                    LogicalOp::Not => a.mapv(|v| !v),
                    LogicalOp::And | LogicalOp::Or => {
                        let rhs = input(1)?;
                        let mut out = a.clone();
                        Zip::from(&mut out).and(rhs.as_bool()?).for_each(|x, &y| {
                            *x = if *op == LogicalOp::And { *x && y } else { *x || y };
                        });
                        out
                    }
                })
            }
            TermKind::NullCheck(check) => {
                let data = input(0)?;
                TermArray::Bool(match check {
                    NullCheck::IsNan => data.as_float()?.mapv(f64::is_nan),
                    NullCheck::NotNan => data.as_float()?.mapv(|v| !v.is_nan()),
                    NullCheck::IsFinite => data.as_float()?.mapv(f64::is_finite),
                    NullCheck::IsNull => data.missing_mask(input_missing(0)),
                    NullCheck::NotNull => data.missing_mask(input_missing(0)).mapv(|m| !m),
                })
            }
            TermKind::FillNa => {
                let data = input(0)?;
                let present = data.missing_mask(input_missing(0)).mapv(|m| !m);
                data.select(present.view(), &input(1)?)?
            }
            TermKind::Where => {
                let cond = input(1)?;
                input(0)?.select(cond.as_bool()?.view(), &input(2)?)?
            }
            TermKind::Clip { min, max } => {
                let (lo, hi) = (min.0, max.0);
                TermArray::Float(
                    input(0)?
                        .as_float()?
                        .mapv(|v| if v.is_nan() { v } else { v.max(lo).min(hi) }),
                )
            }
            TermKind::IsIn(choices) => {
                let data = input(0)?;
                match &data {
                    TermArray::Categorical(labels) => {
                        let wanted: Vec<String> =
                            choices.iter().filter_map(|c| c.as_str().map(str::to_string)).collect();
                        TermArray::Bool(labels.is_in(&wanted))
                    }
                    other => {
                        let present = other.missing_mask(input_missing(0));
                        let wanted: Vec<i64> = choices.iter().filter_map(Scalar::as_i64).collect();
                        let values = other.as_i64()?;
                        TermArray::Bool(Array2::from_shape_fn(shape, |(r, c)| {
                            !present[[r, c]] && wanted.contains(&values[[r, c]])
                        }))
                    }
                }
            }
            TermKind::StrPredicate { op, value } => {
                let data = input(0)?;
                let labels = data.as_labels()?;
                TermArray::Bool(match op {
                    StrOp::Eq => labels.eq_label(value),
                    StrOp::Ne => labels.ne_label(value),
                    StrOp::StartsWith => labels.starts_with(value),
                    StrOp::EndsWith => labels.ends_with(value),
                    StrOp::Contains => labels.has_substring(value),
                })
            }
            TermKind::Relabel(mapping) => {
                let data = input(0)?;
                let relabeled = data.as_labels()?.map_labels(|label| {
                    match mapping.binary_search_by(|(from, _)| from.as_str().cmp(label)) {
                        Ok(i) => mapping[i].1.clone(),
                        Err(_) => Some(label.to_string()),
                    }
                })?;
                TermArray::Categorical(relabeled)
            }
            TermKind::Slice { asset } => {
                let col = self.sids.iter().position(|s| s == asset).ok_or_else(|| {
                    PipelineError::DataError(format!("{} sliced on asset {} which is not in the run", term, asset))
                })?;
                input(0)?.broadcast_column(col, ncols)?
            }
            other => {
                return Err(PipelineError::InvalidInput {
                    term: term.to_string(),
                    reason: format!("{:?} has no row-aligned computation", other),
                })
            }
        })
    }

    /// Group keys from the optional classifier input at position `k`; cells
    /// with a missing group drop out of `valid`
    fn group_keys(
        &self,
        deps: &[NodeId],
        n_inputs: usize,
        k: usize,
        off: usize,
        rows: usize,
        valid: &mut Array2<bool>,
    ) -> Result<Option<Array2<i64>>> {
        if n_inputs <= k {
            return Ok(None);
        }
        let classifier = self.aligned(deps[k], off, rows)?;
        let (keys, present) = classifier.group_keys(self.graph.term(deps[k]).missing_value())?;
        Zip::from(valid).and(&present).for_each(|v, &p| *v = *v && p);
        Ok(Some(keys))
    }
}

fn and_not(valid: &mut Array2<bool>, missing: &Array2<bool>) {
    Zip::from(valid).and(missing).for_each(|v, &m| *v = *v && !m);
}

fn rank_any<T>(
    data: ArrayView2<'_, T>,
    valid: ArrayView2<'_, bool>,
    groups: Option<&Array2<i64>>,
    method: RankMethod,
    ascending: bool,
) -> Array2<f64>
where
    T: PartialOrd + Copy + Send + Sync,
{
    match groups {
        Some(g) => grouped_masked_rankdata_2d(data, valid, g.view(), method, ascending),
        None => masked_rankdata_2d(data, valid, method, ascending),
    }
}

/// Float view of numeric panels; missing cells become NaN
fn to_f64(array: &TermArray, missing: &Scalar) -> Result<Array2<f64>> {
    match array {
        TermArray::Float(a) => Ok(a.clone()),
        TermArray::Int(a) => {
            let m = missing.as_i64().unwrap_or(-1);
            Ok(a.mapv(|v| if v == m { f64::NAN } else { v as f64 }))
        }
        TermArray::Datetime(a) => Ok(a.mapv(|v| if v == NAT { f64::NAN } else { v as f64 })),
        other => Err(PipelineError::TypeMismatch {
            context: "numeric input".to_string(),
            expected: "float64, int64 or datetime64[ns]".to_string(),
            actual: other.dtype().to_string(),
        }),
    }
}

/// Weighted mean with weight `decay^age`; any NaN in the window gives NaN
fn ewma(values: ArrayView1<'_, f64>, decay: f64) -> f64 {
    let n = values.len();
    let (mut num, mut den) = (0.0, 0.0);
    for (i, &v) in values.iter().enumerate() {
        let w = decay.powi((n - 1 - i) as i32);
        num += w * v;
        den += w;
    }
    num / den
}

/// The listed columns of a panel
fn gather_columns(array: &TermArray, cols: &[usize]) -> Result<TermArray> {
    Ok(match array {
        TermArray::Float(a) => TermArray::Float(a.select(Axis(1), cols)),
        TermArray::Int(a) => TermArray::Int(a.select(Axis(1), cols)),
        TermArray::Datetime(a) => TermArray::Datetime(a.select(Axis(1), cols)),
        TermArray::Bool(a) => TermArray::Bool(a.select(Axis(1), cols)),
        TermArray::Categorical(l) => {
            TermArray::Categorical(LabelArray::from_codes(l.codes().select(Axis(1), cols), l.categories().clone())?)
        }
    })
}

/// Concatenate single-row panels vertically
fn stack_rows(parts: Vec<TermArray>, ncols: usize, missing: &Scalar) -> Result<TermArray> {
    fn concat<T: Copy>(rows: Vec<&Array2<T>>, ncols: usize) -> Result<Array2<T>> {
        let flat: Vec<T> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Array2::from_shape_vec((rows.len(), ncols), flat)
            .map_err(|e| PipelineError::DataError(format!("cannot stack window rows: {}", e)))
    }
    let first = match parts.first() {
        Some(p) => p,
        None => return Ok(TermArray::full((0, ncols), missing, missing)),
    };
    Ok(match first {
        TermArray::Float(_) => TermArray::Float(concat(
            parts.iter().map(TermArray::as_float).collect::<Result<_>>()?,
            ncols,
        )?),
        TermArray::Bool(_) => TermArray::Bool(concat(
            parts.iter().map(TermArray::as_bool).collect::<Result<_>>()?,
            ncols,
        )?),
        TermArray::Int(_) => TermArray::Int(concat(
            parts.iter().map(TermArray::as_i64).collect::<Result<_>>()?,
            ncols,
        )?),
        TermArray::Datetime(_) => TermArray::Datetime(concat(
            parts.iter().map(TermArray::as_i64).collect::<Result<_>>()?,
            ncols,
        )?),
        TermArray::Categorical(head) => {
            let labels = parts.iter().map(TermArray::as_labels).collect::<Result<Vec<_>>>()?;
            let categories = head.categories();
            if labels.iter().all(|l| Arc::ptr_eq(l.categories(), categories)) {
                let codes: Vec<Array2<i32>> = labels.iter().map(|l| l.codes().to_owned()).collect();
                TermArray::Categorical(LabelArray::from_codes(concat(codes.iter().collect(), ncols)?, categories.clone())?)
            } else {
                let cells: Vec<Option<&str>> = labels
                    .iter()
                    .flat_map(|l| {
                        let (r, c) = l.shape();
                        (0..r).flat_map(move |i| (0..c).map(move |j| l.get(i, j)))
                    })
                    .collect();
                TermArray::Categorical(LabelArray::from_labels((labels.len(), ncols), cells, head.missing_value())?)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_ewma_weights_recent_values_more() {
        let values = array![1.0, 2.0, 3.0];
        let expected = (0.25 * 1.0 + 0.5 * 2.0 + 3.0) / 1.75;
        assert_relative_eq!(ewma(values.view(), 0.5), expected);
        assert_relative_eq!(ewma(values.view(), 1.0), 2.0);
        assert!(ewma(array![1.0, f64::NAN].view(), 0.5).is_nan());
    }

    #[test]
    fn test_to_f64_maps_missing_to_nan() {
        let ints = TermArray::Int(array![[3, -1]]);
        let out = to_f64(&ints, &Scalar::Int(-1)).unwrap();
        assert_eq!(out[[0, 0]], 3.0);
        assert!(out[[0, 1]].is_nan());
        assert!(to_f64(&TermArray::Bool(array![[true]]), &Scalar::Bool(false)).is_err());
    }

    #[test]
    fn test_stack_rows_shares_categories() {
        let labels = LabelArray::from_labels((2, 2), [Some("a"), None, Some("b"), Some("a")], None).unwrap();
        let whole = TermArray::Categorical(labels);
        let stacked = stack_rows(vec![whole.rows(1, 2), whole.rows(0, 1)], 2, &Scalar::Str(None)).unwrap();
        let out = stacked.as_labels().unwrap();
        assert_eq!(out.get(0, 0), Some("b"));
        assert_eq!(out.get(1, 0), Some("a"));
        assert_eq!(out.get(1, 1), None);
    }

    #[test]
    fn test_gather_columns() {
        let f = TermArray::Float(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let g = gather_columns(&f, &[2, 0]).unwrap();
        assert_eq!(g.as_float().unwrap(), &array![[3.0, 1.0], [6.0, 4.0]]);
    }
}
