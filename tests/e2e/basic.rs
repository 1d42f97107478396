use super::*;

#[test]
fn build_one_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation hello.drv
  out = store/hello
  command = echo hello > $out
",
    )?;
    let out = space.run_expect(&mut goalwork_command(vec!["hello.drv^out"]))?;
    assert_output_contains(&out, "hello.drv^out: built (out=store/hello)");
    assert_eq!(space.read("store/hello")?, "hello\n");

    // Nothing to do the second time.
    let out = space.run_expect(&mut goalwork_command(vec!["hello.drv^out"]))?;
    assert_output_contains(&out, "hello.drv^out: already valid (out=store/hello)");
    Ok(())
}

#[test]
fn substituted_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
path store/src
  substitute = echo source > $out

derivation hello.drv
  out = store/hello
  inputs = store/src
  command = cat $in > $out
",
    )?;
    space.run_expect(&mut goalwork_command(vec!["hello.drv^*"]))?;
    assert_eq!(space.read("store/hello")?, "source\n");

    let out = space.run_expect(&mut goalwork_command(vec!["store/src"]))?;
    assert_output_contains(&out, "store/src: already valid");
    Ok(())
}

#[test]
fn requests_share_one_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation multi.drv
  out = store/multi
  dev = store/multi-dev
  command = echo run >> runs; touch $out $dev
",
    )?;
    let out = space.run_expect(&mut goalwork_command(vec![
        "multi.drv^out",
        "multi.drv^dev",
    ]))?;
    assert_output_contains(&out, "multi.drv^out: built (out=store/multi)\n");
    assert_output_contains(&out, "multi.drv^dev: built (dev=store/multi-dev)\n");
    assert_eq!(space.read("runs")?, "run\n");
    Ok(())
}

#[test]
fn chained_derivations() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "plan.goals",
        "
derivation a.drv
  out = store/a
  command = echo a > $out

derivation b.drv
  out = store/b
  inputs = a.drv^out
  command = cat $in > $out; echo b >> $out
",
    )?;
    space.run_expect(&mut goalwork_command(vec!["-j", "1", "b.drv^out"]))?;
    assert_eq!(space.read("store/b")?, "a\nb\n");
    Ok(())
}

#[test]
fn chdir_and_plan_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.mkdir("sub")?;
    space.write(
        "sub/other.goals",
        "
derivation x.drv
  out = x
  command = touch $out
",
    )?;
    space.run_expect(&mut goalwork_command(vec![
        "-C",
        "sub",
        "-f",
        "other.goals",
        "x.drv^out",
    ]))?;
    assert!(space.read("sub/x").is_ok());
    Ok(())
}
