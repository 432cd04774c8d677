use grading::{assert_output, stdin};
use kestrel::{SystemConfiguration, fs::MemFs};
use kestrel_userprog::{ProgramRegistry, SyscallNumber, UserContext, UserKernel};
use machine::PAGE_SIZE;
use std::sync::Arc;

const NO_ARGS: &[&str] = &[];

fn boot(programs: ProgramRegistry) -> (Arc<UserKernel>, Arc<MemFs>) {
    let fs = Arc::new(MemFs::new());
    let kernel = UserKernel::new(
        SystemConfiguration::builder().quiet(true).build(),
        fs.clone(),
        Arc::new(programs),
    );
    (kernel, fs)
}

fn create(ctx: &mut UserContext, path: &str) -> i32 {
    let path = ctx.push_str(path);
    ctx.syscall(SyscallNumber::Create as i32, path as i32, 0, 0, 0)
}

fn open(ctx: &mut UserContext, path: &str) -> i32 {
    let path = ctx.push_str(path);
    ctx.syscall(SyscallNumber::Open as i32, path as i32, 0, 0, 0)
}

fn unlink(ctx: &mut UserContext, path: &str) -> i32 {
    let path = ctx.push_str(path);
    ctx.syscall(SyscallNumber::Unlink as i32, path as i32, 0, 0, 0)
}

fn read(ctx: &mut UserContext, fd: i32, buf: u32, count: i32) -> i32 {
    ctx.syscall(SyscallNumber::Read as i32, fd, buf as i32, count, 0)
}

fn write(ctx: &mut UserContext, fd: i32, buf: u32, count: i32) -> i32 {
    ctx.syscall(SyscallNumber::Write as i32, fd, buf as i32, count, 0)
}

fn close(ctx: &mut UserContext, fd: i32) -> i32 {
    ctx.syscall(SyscallNumber::Close as i32, fd, 0, 0, 0)
}

fn load_bytes(ctx: &mut UserContext, addr: u32, len: usize) -> Vec<u8> {
    (0..len as u32).map(|i| ctx.load_byte(addr + i)).collect()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Top of the address space of a single-page program.
const TOP: u32 = (10 * PAGE_SIZE) as u32;

mod console {
    use super::*;

    #[test]
    #[stdin(b"")]
    #[assert_output(b"hello, world\n")]
    fn write_to_stdout() {
        let programs = ProgramRegistry::new();
        programs.register_fn("hello", |ctx| {
            let msg = ctx.push_bytes(b"hello, world\n");
            if write(ctx, 1, msg, 13) == 13 { 0 } else { 1 }
        });
        let (kernel, _) = boot(programs);
        assert_eq!(kernel.run("hello", NO_ARGS), Ok(0));
    }

    #[test]
    #[stdin(b"abc")]
    #[assert_output(b"abc")]
    fn echo_stdin() {
        let programs = ProgramRegistry::new();
        programs.register_fn("cat", |ctx| {
            let buf = ctx.push_bytes(&[0; 16]);
            let n = read(ctx, 0, buf, 16);
            if n != 3 || read(ctx, 0, buf, 16) != 0 {
                return 1;
            }
            if write(ctx, 1, buf, n) != n { 2 } else { 0 }
        });
        let (kernel, _) = boot(programs);
        assert_eq!(kernel.run("cat", NO_ARGS), Ok(0));
    }

    #[test]
    #[stdin(b"")]
    #[assert_output(b"parent child ")]
    fn children_share_the_console() {
        let programs = ProgramRegistry::new();
        programs.register_fn("child", |ctx| {
            let msg = ctx.push_bytes(b"child ");
            write(ctx, 1, msg, 6);
            0
        });
        programs.register_fn("parent", |ctx| {
            let msg = ctx.push_bytes(b"parent ");
            write(ctx, 1, msg, 7);
            let path = ctx.push_str("child");
            let pid = ctx.syscall(SyscallNumber::Exec as i32, path as i32, 0, 0, 0);
            let status = ctx.push_bytes(&[0; 4]);
            ctx.syscall(SyscallNumber::Join as i32, pid, status as i32, 0, 0)
        });
        let (kernel, _) = boot(programs);
        assert_eq!(kernel.run("parent", NO_ARGS), Ok(1));
        kernel.join_all();
    }

    #[test]
    fn typed_input() {
        let programs = ProgramRegistry::new();
        programs.register_fn("reader", |ctx| {
            let buf = ctx.push_bytes(&[0; 8]);
            let n = read(ctx, 0, buf, 8);
            if n == 5 && load_bytes(ctx, buf, 5) == b"typed" { 0 } else { 1 }
        });
        let (kernel, _) = boot(programs);
        kernel.console().feed(b"typed");
        assert_eq!(kernel.run("reader", NO_ARGS), Ok(0));
    }

    #[test]
    fn standard_streams_are_one_way() {
        let programs = ProgramRegistry::new();
        programs.register_fn("wrong_way", |ctx| {
            let buf = ctx.push_bytes(b"data");
            if write(ctx, 0, buf, 4) != -1 || read(ctx, 1, buf, 4) != -1 {
                return 1;
            }
            // The standard streams can be closed like any descriptor.
            if close(ctx, 1) != 0 || write(ctx, 1, buf, 4) != -1 {
                return 2;
            }
            0
        });
        let (kernel, _) = boot(programs);
        assert_eq!(kernel.run("wrong_way", NO_ARGS), Ok(0));
    }
}

mod regular_file {
    use super::*;

    #[test]
    fn create_write_read_unlink() {
        let programs = ProgramRegistry::new();
        programs.register_fn("notes", |ctx| {
            let fd = create(ctx, "notes");
            if fd != 2 {
                return 1;
            }
            let buf = ctx.push_bytes(b"0123456789");
            if write(ctx, fd, buf, 10) != 10 {
                return 2;
            }
            if close(ctx, fd) != 0 || close(ctx, fd) != -1 {
                return 3;
            }

            let fd = open(ctx, "notes");
            let out = ctx.push_bytes(&[0; 4]);
            if read(ctx, fd, out, 4) != 4 || load_bytes(ctx, out, 4) != b"0123" {
                return 4;
            }
            if read(ctx, fd, out, 4) != 4 || load_bytes(ctx, out, 4) != b"4567" {
                return 5;
            }
            if read(ctx, fd, out, 4) != 2 || read(ctx, fd, out, 4) != 0 {
                return 6;
            }

            // Unlinking closes the descriptors of the caller.
            if unlink(ctx, "notes") != 0 || read(ctx, fd, out, 4) != -1 {
                return 7;
            }
            if open(ctx, "notes") != -1 || unlink(ctx, "notes") != -1 {
                return 8;
            }
            0
        });
        let (kernel, fs) = boot(programs);
        assert_eq!(kernel.run("notes", NO_ARGS), Ok(0));
        assert!(!fs.exists("notes"));
    }

    #[test]
    fn create_keeps_existing_contents() {
        let programs = ProgramRegistry::new();
        programs.register_fn("append", |ctx| {
            let fd = create(ctx, "log");
            let out = ctx.push_bytes(&[0; 3]);
            if read(ctx, fd, out, 3) != 3 {
                return 1;
            }
            let buf = ctx.push_bytes(b"def");
            if write(ctx, fd, buf, 3) == 3 { 0 } else { 2 }
        });
        let (kernel, fs) = boot(programs);
        fs.add_file("log", b"abc", false);
        assert_eq!(kernel.run("append", NO_ARGS), Ok(0));
        assert_eq!(fs.contents("log").as_deref(), Some(&b"abcdef"[..]));
    }

    #[test]
    fn transfers_span_pages() {
        let programs = ProgramRegistry::new();
        programs.register_fn("big", |ctx| {
            let data = pattern(3 * PAGE_SIZE + 17);
            let len = data.len() as i32;
            let buf = ctx.push_bytes(&data);
            let fd = create(ctx, "big");
            if write(ctx, fd, buf, len) != len {
                return 1;
            }
            close(ctx, fd);

            let copy = ctx.push_bytes(&vec![0; data.len()]);
            let fd = open(ctx, "big");
            if read(ctx, fd, copy, len + 100) != len {
                return 2;
            }
            if load_bytes(ctx, copy, data.len()) != data { 3 } else { 0 }
        });
        let (kernel, fs) = boot(programs);
        assert_eq!(kernel.run("big", NO_ARGS), Ok(0));
        assert_eq!(fs.contents("big"), Some(pattern(3 * PAGE_SIZE + 17)));
    }

    #[test]
    fn read_only_file_rejects_writes() {
        let programs = ProgramRegistry::new();
        programs.register_fn("tamper", |ctx| {
            let fd = open(ctx, "ro");
            if fd < 0 {
                return 1;
            }
            let buf = ctx.push_bytes(&pattern(5000));
            if write(ctx, fd, buf, 5000) != -1 {
                return 2;
            }
            let out = ctx.push_bytes(&[0; 8]);
            if read(ctx, fd, out, 8) != 8 || load_bytes(ctx, out, 8) != b"pristine" {
                return 3;
            }
            0
        });
        let (kernel, fs) = boot(programs);
        fs.add_file("ro", b"pristine", true);
        assert_eq!(kernel.run("tamper", NO_ARGS), Ok(0));
        assert_eq!(fs.contents("ro").as_deref(), Some(&b"pristine"[..]));
    }

    #[test]
    fn partial_transfers() {
        let programs = ProgramRegistry::new();
        programs.register_fn("edge", |ctx| {
            let fd = open(ctx, "hundred");
            // Only the last 10 bytes of the buffer are mapped.
            if read(ctx, fd, TOP - 10, 100) != 10 {
                return 1;
            }
            let out = ctx.push_bytes(&[0; 4]);
            if read(ctx, fd, out, 4) != 4 || load_bytes(ctx, out, 4) != [10, 11, 12, 13] {
                return 2;
            }

            let fd = create(ctx, "tail");
            if write(ctx, fd, TOP - 10, 100) != 10 {
                return 3;
            }
            // Nothing transferred is an error.
            if read(ctx, 2, TOP, 4) != -1 || write(ctx, fd, TOP, 4) != -1 {
                return 4;
            }
            // Code pages cannot be read into.
            if read(ctx, 2, 0, 4) != -1 {
                return 5;
            }
            0
        });
        let (kernel, fs) = boot(programs);
        fs.add_file("hundred", &(0..100).collect::<Vec<u8>>(), false);
        assert_eq!(kernel.run("edge", NO_ARGS), Ok(0));
        assert_eq!(fs.contents("tail").map(|v| v.len()), Some(10));
    }

    #[test]
    fn bad_arguments() {
        let programs = ProgramRegistry::new();
        programs.register_fn("bad", |ctx| {
            let buf = ctx.push_bytes(b"data");
            for fd in [-1, 2, 7, 16, 1000] {
                if write(ctx, fd, buf, 4) != -1 || read(ctx, fd, buf, 4) != -1 || close(ctx, fd) != -1 {
                    return 1;
                }
            }
            if write(ctx, 1, buf, -1) != -1 || read(ctx, 0, buf, -4) != -1 {
                return 2;
            }
            if write(ctx, 1, buf, 0) != 0 {
                return 3;
            }
            if open(ctx, "missing") != -1 || open(ctx, "") != -1 {
                return 4;
            }
            for call in [SyscallNumber::Open, SyscallNumber::Create, SyscallNumber::Unlink] {
                if ctx.syscall(call as i32, 0x7fff_0000, 0, 0, 0) != -1 {
                    return 5;
                }
            }
            let long = "x".repeat(300);
            if create(ctx, &long) != -1 {
                return 6;
            }
            0
        });
        let (kernel, fs) = boot(programs);
        assert_eq!(kernel.run("bad", NO_ARGS), Ok(0));
        assert!(!fs.exists(&"x".repeat(300)));
    }

    #[test]
    fn descriptor_table_fills_up() {
        let programs = ProgramRegistry::new();
        programs.register_fn("hog", |ctx| {
            if ctx.process().files.open_files() != 2 {
                return 5;
            }
            for expected in 2..16 {
                if open(ctx, "shared") != expected {
                    return 1;
                }
            }
            if open(ctx, "shared") != -1 || ctx.process().files.open_files() != 16 {
                return 2;
            }
            // Closed slots are reused lowest first.
            if close(ctx, 9) != 0 || close(ctx, 4) != 0 {
                return 3;
            }
            if open(ctx, "shared") != 4 || open(ctx, "shared") != 9 {
                return 4;
            }
            0
        });
        let (kernel, fs) = boot(programs);
        fs.add_file("shared", b"", false);
        assert_eq!(kernel.run("hog", NO_ARGS), Ok(0));
        // Exit closes every descriptor.
        assert_eq!(fs.open_count("shared"), Some(0));
    }

    #[test]
    fn descriptors_are_per_process() {
        let programs = ProgramRegistry::new();
        programs.register_fn("child", |ctx| {
            let buf = ctx.push_bytes(b"x");
            // Descriptor 2 of the parent is not visible here.
            if write(ctx, 2, buf, 1) != -1 {
                return 1;
            }
            if open(ctx, "file") == 2 { 0 } else { 2 }
        });
        programs.register_fn("parent", |ctx| {
            if open(ctx, "file") != 2 {
                return 1;
            }
            let path = ctx.push_str("child");
            let pid = ctx.syscall(SyscallNumber::Exec as i32, path as i32, 0, 0, 0);
            let status = ctx.push_bytes(&[0; 4]);
            if ctx.syscall(SyscallNumber::Join as i32, pid, status as i32, 0, 0) != 1 {
                return 2;
            }
            0
        });
        let (kernel, fs) = boot(programs);
        fs.add_file("file", b"", false);
        assert_eq!(kernel.run("parent", NO_ARGS), Ok(0));
        kernel.join_all();
    }
}
