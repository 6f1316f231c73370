use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use globepay_payout::fee::FeeSchedule;
use globepay_payout::payout::adapters::FeeOracle;
use globepay_payout::payout::{AmountResolver, OracleError, Quote, ResolutionError};

/// Linear scan from the top: the reference answer
fn brute_force(schedule: &FeeSchedule, total: u64) -> Option<u64> {
    (1..=total)
        .rev()
        .find(|x| x + schedule.fee_for(*x) <= total)
}

#[tokio::test]
async fn qa_resolver_matches_brute_force() {
    let resolver = AmountResolver::default();
    let schedule = FeeSchedule::new(100, 50);

    for total in 1..=10_000u64 {
        let expected = brute_force(&schedule, total);
        let result = resolver.resolve(total, &schedule).await;

        match expected {
            Some(amount) => {
                let resolved = result.unwrap_or_else(|e| panic!("total {total}: {e}"));
                assert_eq!(resolved.recipient_amount, amount, "total {total}");
                assert_eq!(resolved.fee, schedule.fee_for(amount));
                assert_eq!(resolved.total_cost, amount + resolved.fee);
                assert!(resolved.total_cost <= total);

                // Maximality: one more unit no longer fits
                let next = amount + 1;
                assert!(next + schedule.fee_for(next) > total, "total {total}");
            }
            None => assert_eq!(
                result,
                Err(ResolutionError::Infeasible {
                    requested_total: total
                }),
                "total {total}"
            ),
        }
    }
}

#[tokio::test]
async fn qa_totals_at_or_below_floor_are_infeasible() {
    let resolver = AmountResolver::default();
    let schedule = FeeSchedule::new(100, 50);

    for total in 1..=50 {
        assert!(matches!(
            resolver.resolve(total, &schedule).await,
            Err(ResolutionError::Infeasible { .. })
        ));
    }
    assert_eq!(
        resolver.resolve(51, &schedule).await.unwrap().recipient_amount,
        1
    );
}

/// Flat fee per 1_000-unit band: non-decreasing but not continuous
struct BandedOracle {
    calls: AtomicUsize,
}

#[async_trait]
impl FeeOracle for BandedOracle {
    fn name(&self) -> &'static str {
        "banded"
    }

    async fn quote(&self, amount: u64) -> Result<Quote, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fee = 10 + (amount / 1_000) * 25;
        Ok(Quote {
            fee,
            total_from_sender: amount + fee,
            amount_to_recipient: amount,
        })
    }
}

#[tokio::test]
async fn qa_step_function_fee() {
    let resolver = AmountResolver::default();
    let oracle = BandedOracle {
        calls: AtomicUsize::new(0),
    };

    // 999 + 10 = 1_009 fits; 1_000 + 35 = 1_035 does not
    let resolved = resolver.resolve(1_020, &oracle).await.unwrap();
    assert_eq!(resolved.recipient_amount, 999);
    assert_eq!(resolved.fee, 10);
    assert_eq!(resolved.total_cost, 1_009);

    let resolved = resolver.resolve(1_035, &oracle).await.unwrap();
    assert_eq!(resolved.recipient_amount, 1_000);

    assert!(oracle.calls.load(Ordering::SeqCst) <= 2 * 48);
}

#[tokio::test]
async fn qa_search_is_logarithmic() {
    let resolver = AmountResolver::default();
    let oracle = BandedOracle {
        calls: AtomicUsize::new(0),
    };

    resolver.resolve(1_000_000_000_000, &oracle).await.unwrap();
    // ~40 oracle calls for a 2^40 range
    assert!(oracle.calls.load(Ordering::SeqCst) <= 41);
}
