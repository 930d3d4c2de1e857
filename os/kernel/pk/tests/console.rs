use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::Sysno;
use log::LevelFilter;
use pk::SyscallResult;
use std::sync::Mutex;

mod common;

static OUT: Mutex<String> = Mutex::new(String::new());

fn capture(s: &str) {
    OUT.lock().unwrap().push_str(s);
}

#[test]
fn program_output_and_logs_reach_the_console() {
    pk::init_console(capture, LevelFilter::Info);
    let (_ram, kernel) = common::kernel(256);
    kernel.start_user(&common::file(common::program()), &["prog"]).unwrap();

    let buf = VirtualAddress::new(common::DATA);
    kernel.vm().lock().write_user(buf, b"hello\n").unwrap();
    assert_eq!(
        kernel.syscall(Sysno::Write as u64, [1, buf.as_u64(), 6, 0, 0, 0]),
        SyscallResult::Return(6)
    );

    let out = OUT.lock().unwrap().clone();
    assert!(out.contains("[INFO] pk: user entry"));
    assert!(out.ends_with("hello\n"));
}
