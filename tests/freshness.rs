use std::fs;
use std::path::PathBuf;

use buildstamp::fingerprint::{
    DirtyReason, StepDescription, run_and_write_depfile_if_stale, run_if_stale,
};
use buildstamp::{ConfigurationError, MissingInputError};
use tempfile::TempDir;

struct StepFixture {
    dir: TempDir,
    record: PathBuf,
    input: PathBuf,
    output: PathBuf,
}

impl StepFixture {
    fn new() -> StepFixture {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("step.stamp");
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "alpha").unwrap();
        StepFixture {
            dir,
            record,
            input,
            output,
        }
    }

    fn step<'a>(
        &'a self,
        inputs: &'a [PathBuf],
        strings: &'a [String],
        outputs: &'a [PathBuf],
    ) -> StepDescription<'a> {
        StepDescription {
            record_path: &self.record,
            input_paths: inputs,
            input_strings: strings,
            output_paths: outputs,
            force: false,
        }
    }
}

#[test]
fn unchanged_step_runs_only_once() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec!["--opt".to_string()];
    let outputs = vec![f.output.clone()];
    let step = f.step(&inputs, &strings, &outputs);

    let mut runs = 0;
    let ran = run_if_stale(&step, |_| {
        runs += 1;
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();
    assert!(ran);
    assert_eq!(runs, 1);

    let ran = run_if_stale(&step, |_| {
        runs += 1;
        Ok(())
    })
    .unwrap();
    assert!(!ran);
    assert_eq!(runs, 1);
}

#[test]
fn single_byte_change_is_detected() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![f.output.clone()];
    let step = f.step(&inputs, &strings, &outputs);

    run_if_stale(&step, |_| {
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();

    // Same length, one byte different: only the content digest can notice.
    fs::write(&f.input, "alpHa").unwrap();
    let mut reason = None;
    let ran = run_if_stale(&step, |r| {
        reason = Some(r.clone());
        Ok(())
    })
    .unwrap();
    assert!(ran);
    assert!(matches!(
        reason,
        Some(DirtyReason::InputContentsChanged { .. })
    ));
}

#[test]
fn changed_input_strings_are_detected() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let outputs = vec![f.output.clone()];

    let strings = vec!["--debug".to_string()];
    run_if_stale(&f.step(&inputs, &strings, &outputs), |_| {
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();

    let strings = vec!["--release".to_string()];
    let ran = run_if_stale(&f.step(&inputs, &strings, &outputs), |_| Ok(())).unwrap();
    assert!(ran);
}

#[test]
fn changed_output_set_is_detected() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec![];

    let outputs = vec![f.output.clone()];
    run_if_stale(&f.step(&inputs, &strings, &outputs), |_| {
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();

    let second = f.dir.path().join("out2.txt");
    let outputs = vec![f.output.clone(), second.clone()];
    let ran = run_if_stale(&f.step(&inputs, &strings, &outputs), |_| {
        fs::write(&second, "more")?;
        Ok(())
    })
    .unwrap();
    assert!(ran);

    // The new output was missing from disk, so that fires first; shrinking
    // back to a single output must also count as a change.
    let outputs = vec![f.output.clone()];
    let mut reason = None;
    let ran = run_if_stale(&f.step(&inputs, &strings, &outputs), |r| {
        reason = Some(r.clone());
        Ok(())
    })
    .unwrap();
    assert!(ran);
    assert!(matches!(reason, Some(DirtyReason::OutputSetChanged { .. })));
}

#[test]
fn missing_output_forces_rerun() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![f.output.clone()];
    let step = f.step(&inputs, &strings, &outputs);

    run_if_stale(&step, |_| {
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();

    fs::remove_file(&f.output).unwrap();
    let mut reason = None;
    let ran = run_if_stale(&step, |r| {
        reason = Some(r.clone());
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();
    assert!(ran);
    assert!(matches!(reason, Some(DirtyReason::MissingOutput { .. })));
}

#[test]
fn failed_work_leaves_the_record_untouched() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![f.output.clone()];
    let step = f.step(&inputs, &strings, &outputs);

    run_if_stale(&step, |_| {
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();
    let record_before = fs::read(&f.record).unwrap();
    let json_before = fs::read(f.record.with_extension("json")).unwrap();

    fs::write(&f.input, "alpHa").unwrap();
    let err = run_if_stale(&step, |_| Err(anyhow::format_err!("tool exploded"))).unwrap_err();
    assert!(err.to_string().contains("tool exploded"));

    assert_eq!(fs::read(&f.record).unwrap(), record_before);
    assert_eq!(
        fs::read(f.record.with_extension("json")).unwrap(),
        json_before
    );

    // And the step is still considered stale afterwards.
    let ran = run_if_stale(&step, |_| Ok(())).unwrap();
    assert!(ran);
}

#[test]
fn force_reruns_a_fresh_step() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![f.output.clone()];

    run_if_stale(&f.step(&inputs, &strings, &outputs), |_| {
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();

    let mut step = f.step(&inputs, &strings, &outputs);
    step.force = true;
    let mut reason = None;
    let ran = run_if_stale(&step, |r| {
        reason = Some(r.clone());
        Ok(())
    })
    .unwrap();
    assert!(ran);
    assert!(matches!(reason, Some(DirtyReason::Forced)));
}

#[test]
fn empty_output_list_is_rejected() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![];

    let err = run_if_stale(&f.step(&inputs, &strings, &outputs), |_| Ok(())).unwrap_err();
    assert!(err.downcast_ref::<ConfigurationError>().is_some());
}

#[test]
fn missing_input_is_an_error() {
    let f = StepFixture::new();
    let inputs = vec![f.dir.path().join("never-created.txt")];
    let strings = vec![];
    let outputs = vec![f.output.clone()];

    let err = run_if_stale(&f.step(&inputs, &strings, &outputs), |_| Ok(())).unwrap_err();
    let missing = err.downcast_ref::<MissingInputError>().unwrap();
    assert!(missing.path.ends_with("never-created.txt"));
}

#[test]
fn corrupt_record_causes_a_conservative_rerun() {
    let f = StepFixture::new();
    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![f.output.clone()];
    let step = f.step(&inputs, &strings, &outputs);

    run_if_stale(&step, |_| {
        fs::write(&f.output, "artifact")?;
        Ok(())
    })
    .unwrap();
    fs::write(f.record.with_extension("json"), "{not json").unwrap();

    let mut reason = None;
    let ran = run_if_stale(&step, |r| {
        reason = Some(r.clone());
        Ok(())
    })
    .unwrap();
    assert!(ran);
    assert!(reason.is_some_and(|r| r.is_fresh_build()));
}

#[test]
fn depfile_is_written_after_success() {
    let f = StepFixture::new();
    let tool = f.dir.path().join("tools/packer.cfg");
    fs::create_dir_all(tool.parent().unwrap()).unwrap();
    fs::write(&tool, "v1").unwrap();
    let extra = f.dir.path().join("extra.dat");
    fs::write(&extra, "x").unwrap();
    let depfile = f.dir.path().join("out.d");

    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![f.output.clone()];
    let step = f.step(&inputs, &strings, &outputs);

    let ran = run_and_write_depfile_if_stale(
        &step,
        Some(&depfile),
        &[tool.clone()],
        &[extra.clone()],
        |_| {
            fs::write(&f.output, "artifact")?;
            Ok(())
        },
    )
    .unwrap();
    assert!(ran);

    let contents = fs::read_to_string(&depfile).unwrap();
    assert_eq!(
        contents,
        format!(
            "{}: {} {}\n",
            f.output.display(),
            tool.display(),
            extra.display()
        )
    );

    // Nothing changed: no re-run, depfile left alone.
    let ran = run_and_write_depfile_if_stale(
        &step,
        Some(&depfile),
        &[tool.clone()],
        &[extra.clone()],
        |_| Ok(()),
    )
    .unwrap();
    assert!(!ran);

    // The tool itself is tracked as an input.
    fs::write(&tool, "v2").unwrap();
    let ran = run_and_write_depfile_if_stale(
        &step,
        Some(&depfile),
        &[tool.clone()],
        &[extra.clone()],
        |_| Ok(()),
    )
    .unwrap();
    assert!(ran);
}

#[test]
fn failed_work_does_not_write_a_depfile() {
    let f = StepFixture::new();
    let depfile = f.dir.path().join("out.d");
    let inputs = vec![f.input.clone()];
    let strings = vec![];
    let outputs = vec![f.output.clone()];
    let step = f.step(&inputs, &strings, &outputs);

    let err = run_and_write_depfile_if_stale(&step, Some(&depfile), &[], &[], |_| {
        Err(anyhow::format_err!("tool exploded"))
    })
    .unwrap_err();
    assert!(err.to_string().contains("tool exploded"));
    assert!(!depfile.exists());
    assert!(!f.record.exists());
}
