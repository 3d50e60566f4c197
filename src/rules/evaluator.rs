//! Rule evaluation against a sample and the target's history

use super::parser::{Expression, Rule, Threshold};
use crate::alerts::History;

/// Resolve the threshold of an expression, modifier applied.
///
/// `None` means the expression is indeterminate this cycle: a historical
/// threshold with a history that is missing or not yet full.
pub fn resolve_threshold(expr: &Expression, history: Option<&History>) -> Option<f64> {
    let base = match expr.threshold() {
        Threshold::Value(value) => value,
        Threshold::Historical => {
            let history = history.filter(|h| h.is_full())?;
            history.mean()?
        }
    };
    Some(expr.modifier().apply(base))
}

/// Evaluate one expression; indeterminate expressions do not match
pub fn evaluate_expression(expr: &Expression, value: f64, history: Option<&History>) -> bool {
    match resolve_threshold(expr, history) {
        Some(threshold) => expr.comparator().apply(value, threshold),
        None => false,
    }
}

/// Evaluate a whole rule, folding connectors left to right
pub fn evaluate_rule(rule: &Rule, value: f64, history: Option<&History>) -> bool {
    let mut results = rule
        .expressions()
        .iter()
        .map(|expr| evaluate_expression(expr, value, history));

    let Some(first) = results.next() else {
        return false;
    };

    rule.connectors()
        .iter()
        .zip(results)
        .fold(first, |acc, (op, rhs)| op.apply(acc, rhs))
}

/// First rule that matches, in the given order. Rules are expected to be
/// sorted by severity already.
pub fn first_match<'a>(rules: &'a [Rule], value: f64, history: Option<&History>) -> Option<&'a Rule> {
    rules
        .iter()
        .find(|rule| evaluate_rule(rule, value, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Level;
    use crate::rules::sort_by_severity;

    fn rule(raw: &str) -> Rule {
        Rule::parse(raw).unwrap()
    }

    fn full_history(values: &[f64]) -> History {
        let mut history = History::new(values.len());
        for v in values {
            history.push(*v);
        }
        history
    }

    #[test]
    fn test_comparator_boundaries() {
        let eps = 1e-9;
        let cases: [(&str, [bool; 3]); 6] = [
            ("warning: > 50", [false, false, true]),
            ("warning: >= 50", [false, true, true]),
            ("warning: < 50", [true, false, false]),
            ("warning: <= 50", [true, true, false]),
            ("warning: == 50", [false, true, false]),
            ("warning: != 50", [true, false, true]),
        ];

        for (raw, expected) in cases {
            let r = rule(raw);
            let got = [
                evaluate_rule(&r, 50.0 - eps, None),
                evaluate_rule(&r, 50.0, None),
                evaluate_rule(&r, 50.0 + eps, None),
            ];
            assert_eq!(got, expected, "{raw}");
        }
    }

    #[test]
    fn test_units_at_boundary() {
        let r = rule("critical: >= 3MB");
        assert!(evaluate_rule(&r, 3_145_728.0, None));
        assert!(!evaluate_rule(&r, 3_145_727.0, None));
    }

    #[test]
    fn test_historical_waits_for_full_history() {
        let r = rule("warning: > historical");

        assert!(!evaluate_rule(&r, 1_000.0, None));

        let mut history = History::new(3);
        history.push(1.0);
        history.push(2.0);
        assert!(!evaluate_rule(&r, 1_000.0, Some(&history)));

        history.push(3.0);
        assert!(evaluate_rule(&r, 2.5, Some(&history)));
        assert!(!evaluate_rule(&r, 2.0, Some(&history)));
    }

    #[test]
    fn test_historical_modifier() {
        let history = full_history(&[10.0, 20.0, 30.0]);
        let r = rule("warning: < historical / 2");
        assert!(evaluate_rule(&r, 9.0, Some(&history)));
        assert!(!evaluate_rule(&r, 10.0, Some(&history)));

        let r = rule("warning: > historical * 1.5");
        assert_eq!(resolve_threshold(&r.expressions()[0], Some(&history)), Some(30.0));
    }

    #[test]
    fn test_left_to_right_fold() {
        // (false AND true) OR true
        let r = rule("warning: > 100 AND > 0 OR < 50");
        assert!(evaluate_rule(&r, 10.0, None));

        // (true OR false) AND false; AND-first precedence would say true
        let r = rule("warning: > 0 OR > 100 AND < 5");
        assert!(!evaluate_rule(&r, 10.0, None));
    }

    #[test]
    fn test_indeterminate_expression_in_chain() {
        let r = rule("warning: > historical * 1.05 AND > 70");
        assert!(!evaluate_rule(&r, 100.0, None));

        let r = rule("warning: > historical OR > 70");
        assert!(evaluate_rule(&r, 100.0, None));
    }

    #[test]
    fn test_first_match_respects_severity() {
        let mut rules = vec![
            rule("warning: > 50"),
            rule("normal: > 0"),
            rule("critical: > 100"),
        ];
        sort_by_severity(&mut rules);

        let level = |v| first_match(&rules, v, None).map(Rule::level);
        assert_eq!(level(110.0), Some(Level::Critical));
        assert_eq!(level(60.0), Some(Level::Warning));
        assert_eq!(level(10.0), Some(Level::Normal));
        assert_eq!(level(-1.0), None);
    }
}
