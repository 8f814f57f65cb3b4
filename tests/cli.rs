use std::process::{Command, Output};

use progerror::describe;

fn progerror(args: &[&str]) -> Output {
    let bin = env!("CARGO_BIN_EXE_progerror");
    Command::new(bin).args(args).output().unwrap()
}

fn stderr(out: &Output) -> String {
    String::from_utf8(out.stderr.clone()).unwrap()
}

#[test]
fn prints_prefixed_message_and_returns() {
    let out = progerror(&["-n", "tool", "cannot read %s (%d bytes)", "data.bin", "512"]);
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
    assert_eq!(stderr(&out), "tool: cannot read data.bin (512 bytes)\n");
}

#[test]
fn appends_system_error_description() {
    let out = progerror(&["-n", "tool", "-e", "2", "open %s", "missing.txt"]);
    assert!(out.status.success());
    assert_eq!(
        stderr(&out),
        format!("tool: open missing.txt: {}\n", describe(2))
    );
}

#[test]
fn nonzero_status_terminates_with_that_code() {
    let out = progerror(&["-n", "tool", "-s", "3", "fatal: %s", "giving up"]);
    assert_eq!(out.status.code(), Some(3));
    assert_eq!(stderr(&out), "tool: fatal: giving up\n");
}

#[test]
fn status_and_errnum_combine() {
    let out = progerror(&["-n", "tool", "-s", "1", "-e", "13", "write"]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stderr(&out), format!("tool: write: {}\n", describe(13)));
}

#[test]
fn file_and_line_prefix_the_message() {
    let out = progerror(&["-n", "cc", "-f", "main.c", "-l", "42", "expected %c", ";"]);
    assert!(out.status.success());
    assert_eq!(stderr(&out), "cc: main.c:42: expected ;\n");
}

#[test]
fn numeric_operands_are_converted_per_directive() {
    let out = progerror(&["-n", "t", "%x %05.1f %u", "0x1f", "2.5", "-1"]);
    assert!(out.status.success());
    assert_eq!(stderr(&out), "t: 1f 002.5 4294967295\n");
}

#[test]
fn missing_operands_default_to_zero_and_empty() {
    let out = progerror(&["-n", "t", "[%s|%d]"]);
    assert!(out.status.success());
    assert_eq!(stderr(&out), "t: [|0]\n");
}

#[test]
fn invalid_number_is_a_usage_error() {
    let out = progerror(&["-n", "t", "%d", "twelve"]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(stderr(&out), "t: invalid number: twelve\n");
}

#[test]
fn double_signed_operand_is_a_usage_error() {
    let out = progerror(&["-n", "t", "%d", "--", "--5"]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(stderr(&out), "t: invalid number: --5\n");
}

#[test]
fn negative_errnum_is_accepted() {
    let out = progerror(&["-n", "t", "-e", "-5", "odd"]);
    assert!(out.status.success());
    assert_eq!(stderr(&out), format!("t: odd: {}\n", describe(-5)));
}

#[test]
fn file_without_line_is_rejected() {
    let out = progerror(&["-f", "main.c", "message"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn default_name_is_the_invocation_name() {
    let bin = env!("CARGO_BIN_EXE_progerror");
    let out = Command::new(bin).arg("hello").output().unwrap();
    assert!(out.status.success());
    assert_eq!(stderr(&out), format!("{bin}: hello\n"));
}

#[cfg(unix)]
#[test]
fn argv0_is_printed_as_given() {
    use std::os::unix::process::CommandExt;

    let bin = env!("CARGO_BIN_EXE_progerror");
    let out = Command::new(bin).arg0("renamed").arg("hi").output().unwrap();
    assert_eq!(stderr(&out), "renamed: hi\n");
}

#[cfg(unix)]
#[test]
fn closed_stdout_does_not_stop_the_diagnostic() {
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_progerror"));
    cmd.args(["-n", "t", "-s", "4", "hi"]);
    unsafe {
        cmd.pre_exec(|| {
            libc::close(1);
            Ok(())
        });
    }
    let out = cmd.output().unwrap();
    assert_eq!(out.status.code(), Some(4));
    assert_eq!(stderr(&out), "t: hi\n");
}
