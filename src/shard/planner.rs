//! Query sharding planner
//!
//! Rewrites a query into a form whose shardable sub-expressions run as
//! `total_shards` independent sub-queries, recombined by the original
//! aggregation. The decision procedure is conservative: an expression is only
//! sharded when partitioning the series-hash space provably commutes with it;
//! everything else is passed downstream textually intact.
//!
//! # What Gets Sharded
//!
//! `sum`, `min`, `max` and `count` aggregations whose operand is a vector
//! selector or a per-series range function over one. The partials carry the
//! shard label in their grouping so they stay distinct series until the outer
//! aggregation recombines them; `count` partials recombine with `sum`. `avg`
//! is split into `sum(...) / count(...)` first, then both legs are sharded.
//!
//! # Example
//!
//! `sum by (host) (cpu_usage)` with 2 shards becomes, schematically:
//!
//! ```text
//! sum by (host) (
//!     __sharded_queries__{__queries__="{\"concat\":[
//!         sum by (host, __query_shard__) (cpu_usage{__query_shard__=\"0_of_2\"}),
//!         sum by (host, __query_shard__) (cpu_usage{__query_shard__=\"1_of_2\"})
//!     ]}"}
//! )
//! ```
//!
//! Rewriting is deterministic: the same query and shard count always produce
//! byte-identical output.

use crate::error::{Error, Result};
use crate::query::ast::{AggregateOp, Expr, VectorSelector};
use crate::query::parser::parse_query;
use crate::shard::embedded::{embed_queries, EMBEDDED_METRIC};
use crate::shard::selector::{ShardSelector, SHARD_LABEL};

/// Bookkeeping for one planning invocation
///
/// `sharded_queries == 0` after a successful plan means the query parsed and
/// rewrote cleanly but contained nothing worth parallelizing; callers must
/// treat that as a non-sharded outcome, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapperStats {
    sharded_queries: usize,
}

impl MapperStats {
    /// Create zeroed stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of shardable sub-queries embedded by the rewrite
    pub fn sharded_queries(&self) -> usize {
        self.sharded_queries
    }

    fn add(&mut self, count: usize) {
        self.sharded_queries += count;
    }
}

/// Rewrites queries into sharded form
#[derive(Debug, Clone)]
pub struct ShardingPlanner {
    total_shards: u32,
}

impl ShardingPlanner {
    /// Create a planner for a fixed shard count
    ///
    /// Callers decide the sharding policy before invoking the planner;
    /// anything below 2 shards is a caller bug, not a plannable input.
    pub fn new(total_shards: u32) -> Result<Self> {
        if total_shards < 2 {
            return Err(Error::Internal(format!(
                "sharding requires at least 2 shards, got {}",
                total_shards
            )));
        }
        Ok(Self { total_shards })
    }

    /// Rewrite a query into sharded form
    ///
    /// Returns the rewritten query text and the mapper stats. A parse failure
    /// is a client-input error; the rewrite itself cannot fail on a parsed
    /// query short of an internal bug.
    pub fn plan(&self, query: &str) -> Result<(String, MapperStats)> {
        let expr = parse_query(query)?;
        let mut stats = MapperStats::new();
        let mapped = self.map_expr(&expr, &mut stats)?;

        // Once anything was sharded, fold the remaining data accesses into
        // single-query envelopes so the evaluator only ever touches the data
        // through embedded sub-queries.
        let mapped = if stats.sharded_queries() > 0 {
            fold_unsharded(mapped)?
        } else {
            mapped
        };

        Ok((mapped.to_string(), stats))
    }

    fn map_expr(&self, expr: &Expr, stats: &mut MapperStats) -> Result<Expr> {
        match expr {
            Expr::Number(n) => Ok(Expr::Number(*n)),
            Expr::Selector(selector) => Ok(Expr::Selector(selector.clone())),
            Expr::RangeFunction { func, arg } => Ok(Expr::RangeFunction {
                func: *func,
                arg: arg.clone(),
            }),
            Expr::Binary { op, lhs, rhs } => Ok(Expr::Binary {
                op: *op,
                lhs: Box::new(self.map_expr(lhs, stats)?),
                rhs: Box::new(self.map_expr(rhs, stats)?),
            }),
            Expr::Aggregate { op, grouping, expr: inner } => {
                if !shardable_operand(inner) {
                    return Ok(Expr::Aggregate {
                        op: *op,
                        grouping: grouping.clone(),
                        expr: Box::new(self.map_expr(inner, stats)?),
                    });
                }

                match op {
                    // Averages of averages are wrong; split into a quotient
                    // of two shardable aggregations instead.
                    AggregateOp::Avg => {
                        let split = Expr::Binary {
                            op: crate::query::ast::BinaryOp::Div,
                            lhs: Box::new(Expr::Aggregate {
                                op: AggregateOp::Sum,
                                grouping: grouping.clone(),
                                expr: inner.clone(),
                            }),
                            rhs: Box::new(Expr::Aggregate {
                                op: AggregateOp::Count,
                                grouping: grouping.clone(),
                                expr: inner.clone(),
                            }),
                        };
                        self.map_expr(&split, stats)
                    }
                    _ => self.shard_aggregate(*op, grouping, inner, stats),
                }
            }
        }
    }

    /// Clone one aggregation into per-shard sub-queries and embed them
    fn shard_aggregate(
        &self,
        op: AggregateOp,
        grouping: &[String],
        inner: &Expr,
        stats: &mut MapperStats,
    ) -> Result<Expr> {
        // Partials keep the shard label in their grouping so results from
        // different shards stay distinct until the outer aggregation runs.
        let mut inner_grouping = grouping.to_vec();
        inner_grouping.push(SHARD_LABEL.to_string());

        let mut queries = Vec::with_capacity(self.total_shards as usize);
        for shard in 0..self.total_shards {
            let selector = ShardSelector::new(shard, self.total_shards)?;
            let sub = Expr::Aggregate {
                op,
                grouping: inner_grouping.clone(),
                expr: Box::new(annotate_operand(inner, &selector)?),
            };
            queries.push(sub.to_string());
        }
        stats.add(queries.len());

        // Per-shard counts recombine by summation; everything else recombines
        // with its own operator.
        let combiner = match op {
            AggregateOp::Count => AggregateOp::Sum,
            other => other,
        };

        Ok(Expr::Aggregate {
            op: combiner,
            grouping: grouping.to_vec(),
            expr: Box::new(Expr::Selector(embed_queries(&queries)?)),
        })
    }
}

/// Whether an aggregation operand commutes with hash-space partitioning
///
/// True only for a vector selector, or a per-series range function over one,
/// that is not already shard-annotated or an embedded envelope. When in
/// doubt, the answer is no.
fn shardable_operand(expr: &Expr) -> bool {
    match expr {
        Expr::Selector(selector) => eligible_selector(selector),
        Expr::RangeFunction { arg, .. } => eligible_selector(arg),
        _ => false,
    }
}

fn eligible_selector(selector: &VectorSelector) -> bool {
    selector.metric != EMBEDDED_METRIC && !selector.has_matcher(SHARD_LABEL)
}

/// Append the shard matcher to the operand's selector
fn annotate_operand(expr: &Expr, selector: &ShardSelector) -> Result<Expr> {
    match expr {
        Expr::Selector(inner) => Ok(Expr::Selector(inner.with_matcher(selector.matcher()))),
        Expr::RangeFunction { func, arg } => Ok(Expr::RangeFunction {
            func: *func,
            arg: arg.with_matcher(selector.matcher()),
        }),
        _ => Err(Error::Internal(
            "attempted to shard-annotate a non-leaf operand".to_string(),
        )),
    }
}

/// Fold subtrees that still access data directly into single-query envelopes
fn fold_unsharded(expr: Expr) -> Result<Expr> {
    if !contains_embedded(&expr) {
        if contains_data_selector(&expr) {
            let query = expr.to_string();
            return Ok(Expr::Selector(embed_queries(&[query])?));
        }
        return Ok(expr);
    }

    match expr {
        Expr::Binary { op, lhs, rhs } => Ok(Expr::Binary {
            op,
            lhs: Box::new(fold_unsharded(*lhs)?),
            rhs: Box::new(fold_unsharded(*rhs)?),
        }),
        Expr::Aggregate { op, grouping, expr } => Ok(Expr::Aggregate {
            op,
            grouping,
            expr: Box::new(fold_unsharded(*expr)?),
        }),
        other => Ok(other),
    }
}

fn contains_embedded(expr: &Expr) -> bool {
    expr.any_selector(|s| s.metric == EMBEDDED_METRIC)
}

fn contains_data_selector(expr: &Expr) -> bool {
    expr.any_selector(|s| s.metric != EMBEDDED_METRIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::embedded::extract_queries;

    /// Parse a rewritten query and pull out every envelope's sub-query list,
    /// left to right
    fn embedded_queries(rewritten: &str) -> Vec<Vec<String>> {
        let expr = parse_query(rewritten).expect("rewritten query must re-parse");
        let mut out = Vec::new();
        expr.visit_selectors(&mut |selector| {
            if selector.metric == EMBEDDED_METRIC {
                out.push(
                    extract_queries(&selector.matchers)
                        .unwrap()
                        .expect("envelope must decode"),
                );
            }
        });
        out
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = ShardingPlanner::new(4).unwrap();
        let (first, first_stats) = planner.plan("sum by (host) (cpu_usage)").unwrap();
        let (second, second_stats) = planner.plan("sum by (host) (cpu_usage)").unwrap();
        assert_eq!(first, second);
        assert_eq!(first_stats, second_stats);
    }

    #[test]
    fn test_sum_rewrite_shape() {
        let planner = ShardingPlanner::new(2).unwrap();
        let (rewritten, stats) = planner.plan("sum by (host) (cpu_usage)").unwrap();
        assert_eq!(stats.sharded_queries(), 2);

        let envelopes = embedded_queries(&rewritten);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(
            envelopes[0],
            vec![
                "sum by (host, __query_shard__) (cpu_usage{__query_shard__=\"0_of_2\"})",
                "sum by (host, __query_shard__) (cpu_usage{__query_shard__=\"1_of_2\"})",
            ]
        );

        // Outer combiner keeps the original operator and grouping
        assert!(rewritten.starts_with("sum by (host) ("));
    }

    #[test]
    fn test_sum_of_rate_is_shardable() {
        let planner = ShardingPlanner::new(2).unwrap();
        let (rewritten, stats) = planner
            .plan("sum(rate(http_requests_total[5m]))")
            .unwrap();
        assert_eq!(stats.sharded_queries(), 2);

        let envelopes = embedded_queries(&rewritten);
        assert_eq!(
            envelopes[0][0],
            "sum by (__query_shard__) (rate(http_requests_total{__query_shard__=\"0_of_2\"}[5m]))"
        );
    }

    #[test]
    fn test_count_recombines_with_sum() {
        let planner = ShardingPlanner::new(2).unwrap();
        let (rewritten, stats) = planner.plan("count(cpu_usage)").unwrap();
        assert_eq!(stats.sharded_queries(), 2);

        assert!(rewritten.starts_with("sum("));
        let envelopes = embedded_queries(&rewritten);
        assert!(envelopes[0][0].starts_with("count by (__query_shard__) ("));
    }

    #[test]
    fn test_avg_splits_into_sum_over_count() {
        let planner = ShardingPlanner::new(3).unwrap();
        let (rewritten, stats) = planner.plan("avg by (host) (cpu_usage)").unwrap();
        // Both legs shard: 3 + 3
        assert_eq!(stats.sharded_queries(), 6);

        let expr = parse_query(&rewritten).unwrap();
        let Expr::Binary { op, .. } = expr else {
            panic!("expected quotient, got {}", rewritten);
        };
        assert_eq!(op, crate::query::ast::BinaryOp::Div);

        let envelopes = embedded_queries(&rewritten);
        assert_eq!(envelopes.len(), 2);
        assert!(envelopes[0][0].starts_with("sum by (host, __query_shard__) ("));
        assert!(envelopes[1][0].starts_with("count by (host, __query_shard__) ("));
    }

    #[test]
    fn test_min_max_keep_their_operator() {
        let planner = ShardingPlanner::new(2).unwrap();
        for op in ["min", "max"] {
            let (rewritten, stats) = planner.plan(&format!("{}(cpu_usage)", op)).unwrap();
            assert_eq!(stats.sharded_queries(), 2);
            assert!(rewritten.starts_with(&format!("{}(", op)));
            let envelopes = embedded_queries(&rewritten);
            assert!(envelopes[0][1].starts_with(&format!("{} by (__query_shard__) (", op)));
        }
    }

    #[test]
    fn test_unshardable_query_reports_zero() {
        let planner = ShardingPlanner::new(4).unwrap();
        for query in [
            "cpu_usage",
            "rate(http_requests_total[5m])",
            "sum(a + b)",
            "sum(sum(cpu_usage{__query_shard__=\"0_of_4\"}))",
        ] {
            let (_, stats) = planner.plan(query).unwrap();
            assert_eq!(stats.sharded_queries(), 0, "query: {}", query);
        }
    }

    #[test]
    fn test_nested_aggregation_shards_the_inner_one() {
        let planner = ShardingPlanner::new(2).unwrap();
        let (rewritten, stats) = planner.plan("max(sum by (host) (cpu_usage))").unwrap();
        assert_eq!(stats.sharded_queries(), 2);
        assert!(rewritten.starts_with("max(sum by (host) ("));
    }

    #[test]
    fn test_partial_shard_folds_remaining_selectors() {
        let planner = ShardingPlanner::new(2).unwrap();
        let (rewritten, stats) = planner.plan("sum(cpu_usage) + other_metric").unwrap();
        assert_eq!(stats.sharded_queries(), 2);

        // Both sides of the binary access data through envelopes now
        let envelopes = embedded_queries(&rewritten);
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[1], vec!["other_metric"]);
    }

    #[test]
    fn test_no_fold_without_sharding() {
        let planner = ShardingPlanner::new(2).unwrap();
        let (rewritten, stats) = planner.plan("a + b").unwrap();
        assert_eq!(stats.sharded_queries(), 0);
        assert_eq!(rewritten, "(a + b)");
    }

    #[test]
    fn test_shard_count_monotonicity() {
        let planner_k = ShardingPlanner::new(3).unwrap();
        let planner_2k = ShardingPlanner::new(6).unwrap();
        for query in [
            "sum(cpu_usage)",
            "avg by (host) (cpu_usage)",
            "max(rate(http_requests_total[1m]))",
        ] {
            let (_, stats_k) = planner_k.plan(query).unwrap();
            let (_, stats_2k) = planner_2k.plan(query).unwrap();
            assert_eq!(stats_2k.sharded_queries() % stats_k.sharded_queries(), 0);
            assert_eq!(stats_2k.sharded_queries(), 2 * stats_k.sharded_queries());
        }
    }

    #[test]
    fn test_parse_failure_is_bad_data() {
        let planner = ShardingPlanner::new(2).unwrap();
        let err = planner.plan("sum(((").unwrap_err();
        assert!(matches!(err, Error::BadData(_)));
    }

    #[test]
    fn test_rejects_degenerate_shard_counts() {
        assert!(ShardingPlanner::new(0).is_err());
        assert!(ShardingPlanner::new(1).is_err());
        assert!(ShardingPlanner::new(2).is_ok());
    }

    #[test]
    fn test_rewritten_query_reparses() {
        let planner = ShardingPlanner::new(4).unwrap();
        let (rewritten, _) = planner
            .plan("avg(rate(http_requests_total{env=\"prod\"}[5m])) + sum by (dc) (mem_used)")
            .unwrap();
        let expr = parse_query(&rewritten).unwrap();
        assert_eq!(expr.to_string(), rewritten);
    }
}
