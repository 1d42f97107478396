//! Tests for how failures are reported.

use super::*;

#[test]
fn dependency_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation bad.drv
  out = store/bad
  command = echo oops; exit 1

derivation top.drv
  out = store/top
  inputs = bad.drv^out
  command = touch $out
",
    )?;
    let out = space.run_fail(&mut goalwork_command(vec!["top.drv^out"]))?;
    assert_output_contains(&out, "failed: bad.drv");
    assert_output_contains(&out, "builder for 'bad.drv' failed with exit code 1");
    assert_output_contains(&out, "> oops");
    assert_output_contains(
        &out,
        "top.drv^out: dependency failed: cannot build 'top.drv': 1 dependencies couldn't be realised",
    );
    assert!(space.read("store/top").is_err());
    Ok(())
}

#[test]
fn keep_going_builds_independent_work() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation bad.drv
  out = store/bad
  command = exit 1

derivation ok.drv
  out = store/ok
  command = touch $out
",
    )?;
    let out = space.run_fail(&mut goalwork_command(vec!["bad.drv^out", "ok.drv^out"]))?;
    assert_output_contains(&out, "bad.drv^out: permanent failure");
    assert_output_contains(&out, "ok.drv^out: built");
    assert!(space.read("store/ok").is_ok());
    Ok(())
}

#[test]
fn no_substituters() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("plan.goals", "")?;
    let out = space.run_fail(&mut goalwork_command(vec!["store/nothing"]))?;
    assert_output_contains(
        &out,
        "store/nothing: no substituters: path 'store/nothing' is required, but there is no substituter that can build it",
    );
    Ok(())
}

#[test]
fn missing_reference() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
path store/app
  substitute = touch $out
  references = store/lib
",
    )?;
    let out = space.run_fail(&mut goalwork_command(vec!["store/app"]))?;
    assert_output_contains(
        &out,
        "store/app: dependency failed: some references of path 'store/app' could not be realised",
    );
    assert!(space.read("store/app").is_err());
    Ok(())
}

#[test]
fn output_not_produced() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation lazy.drv
  out = store/lazy
  command = true
",
    )?;
    let out = space.run_fail(&mut goalwork_command(vec!["lazy.drv^out"]))?;
    assert_output_contains(
        &out,
        "lazy.drv^out: output rejected: builder for 'lazy.drv' failed to produce output path 'store/lazy'",
    );
    Ok(())
}

#[test]
fn zero_jobs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation x.drv
  out = store/x
  command = touch $out
",
    )?;
    let out = space.run_fail(&mut goalwork_command(vec!["-j", "0", "x.drv^out"]))?;
    assert_output_contains(&out, "goalwork: error: unable to start any build; max jobs is 0");
    Ok(())
}

#[test]
fn bad_plan_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("plan.goals", "rule foo\n")?;
    let out = space.run_fail(&mut goalwork_command(vec!["x.drv^out"]))?;
    assert_output_contains(&out, "goalwork: error: parse error: expected 'derivation' or 'path'");
    assert_output_contains(&out, "plan.goals:1: rule foo");
    Ok(())
}

#[test]
fn bad_request() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("plan.goals", "")?;
    let out = space.run_fail(&mut goalwork_command(vec!["x.drv^"]))?;
    assert_output_contains(&out, "goalwork: error: bad request \"x.drv^\"");
    Ok(())
}
