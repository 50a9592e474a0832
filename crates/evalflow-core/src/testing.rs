use anyhow::Result;
use evalflow_types::ResultsDocument;

use crate::runner::SuiteOutcome;

/// Fail with every failing item listed unless the whole suite passed.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn uppercase_agent() -> anyhow::Result<()> {
///     let outcome = session.run_suite(&eval).await?;
///     assert_suite_passed(&outcome)?;
///     Ok(())
/// }
/// ```
pub fn assert_suite_passed(outcome: &SuiteOutcome) -> Result<()> {
    if outcome.passed() {
        return Ok(());
    }
    let failures: Vec<String> = outcome
        .failures()
        .map(|item| match &item.outcome {
            Err(e) => format!("  {}: {}", item.name, e),
            Ok(_) => format!("  {}", item.name),
        })
        .collect();
    anyhow::bail!(
        "Suite '{}' failed: {}/{} items failed\n{}",
        outcome.suite.name,
        failures.len(),
        outcome.items.len(),
        failures.join("\n")
    );
}

/// Helper to assert the pass rate of a suite meets a threshold.
pub fn assert_pass_rate(outcome: &SuiteOutcome, min_pass_rate: f64) -> Result<()> {
    let total = outcome.items.len();
    let passed = outcome.items.iter().filter(|i| i.passed()).count();
    let rate = if total == 0 { 1.0 } else { passed as f64 / total as f64 };
    if rate < min_pass_rate {
        anyhow::bail!(
            "Suite '{}' failed: pass rate {:.1}% is below threshold {:.1}%",
            outcome.suite.name,
            rate * 100.0,
            min_pass_rate * 100.0
        );
    }
    Ok(())
}

/// Helper to assert a finished run succeeded.
pub fn assert_run_succeeded(doc: &ResultsDocument) -> Result<()> {
    if !doc.is_finished() {
        anyhow::bail!("Run is still {:?}", doc.status);
    }
    if !doc.success {
        anyhow::bail!(
            "Run failed: {}/{} suites failed\n{}",
            doc.num_failed_eval_suites,
            doc.num_total_eval_suites,
            doc.summary_table()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::SuiteRef;
    use crate::error::ItemError;
    use crate::runner::ItemOutcome;
    use evalflow_types::{Aggregation, EvalResult, Score};
    use std::time::Duration;

    fn outcome(passes: &[bool]) -> SuiteOutcome {
        let items = passes
            .iter()
            .enumerate()
            .map(|(index, &ok)| ItemOutcome {
                index,
                name: format!("item {index}"),
                outcome: if ok {
                    Ok(EvalResult::new("x", vec![Score::new("s", 1.0)], Aggregation::Mean, 1.0))
                } else {
                    Err(ItemError::TimedOut {
                        item: format!("item {index}"),
                        timeout: Duration::from_secs(1),
                    })
                },
            })
            .collect();
        SuiteOutcome {
            suite: SuiteRef::new("s", "suite"),
            items,
        }
    }

    #[test]
    fn suite_assertions() {
        assert!(assert_suite_passed(&outcome(&[true, true])).is_ok());
        let err = assert_suite_passed(&outcome(&[true, false])).unwrap_err();
        assert!(err.to_string().contains("item 1"));

        assert!(assert_pass_rate(&outcome(&[true, false]), 0.5).is_ok());
        assert!(assert_pass_rate(&outcome(&[true, false, false]), 0.5).is_err());
    }

    #[test]
    fn run_must_be_finished() {
        let mut doc = ResultsDocument::new(0);
        assert!(assert_run_succeeded(&doc).is_err());
        doc.status = evalflow_types::RunStatus::Finished;
        assert!(assert_run_succeeded(&doc).is_ok());
        doc.success = false;
        assert!(assert_run_succeeded(&doc).is_err());
    }
}
