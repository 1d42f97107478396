//! Tests for build timeouts.

use super::*;
use std::time::{Duration, Instant};

const SLOW_PLAN: &str = "
derivation slow.drv
  out = store/slow
  command = echo started; sleep 20; touch $out
";

#[test]
fn silent_build_times_out() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("plan.goals", SLOW_PLAN)?;
    let start = Instant::now();
    let out = space.run_fail(&mut goalwork_command(vec![
        "--max-silent-time",
        "1",
        "slow.drv^out",
    ]))?;
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_output_contains(
        &out,
        "slow.drv^out: timed out: 'slow.drv' timed out after 1 seconds of silence",
    );
    Ok(())
}

#[test]
fn long_build_times_out() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("plan.goals", SLOW_PLAN)?;
    let out = space.run_fail(&mut goalwork_command(vec!["--timeout", "1", "slow.drv^out"]))?;
    assert_output_contains(
        &out,
        "slow.drv^out: timed out: 'slow.drv' timed out after 1 seconds\n",
    );
    Ok(())
}

#[test]
fn per_derivation_timeout() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation slow.drv
  out = store/slow
  command = sleep 20
  timeout = 1

derivation quick.drv
  out = store/quick
  command = touch $out
",
    )?;
    let out = space.run_fail(&mut goalwork_command(vec!["slow.drv^out", "quick.drv^out"]))?;
    assert_output_contains(&out, "slow.drv^out: timed out: 'slow.drv' timed out after 1 seconds");
    assert_output_contains(&out, "quick.drv^out: built");
    Ok(())
}
