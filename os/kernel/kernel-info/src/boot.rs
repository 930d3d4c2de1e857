//! # Boot Arguments
//!
//! The proxy kernel command line is `pk [flags] program [args...]`. Flags are
//! consumed up to the first argument that does not start with `-`.

use bitfield_struct::bitfield;

/// Runtime switches selected on the kernel command line.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct BootFlags {
    /// `-s`: print VM statistics on exit.
    pub stats: bool,

    /// Cleared by `-p`: populate every mapping eagerly instead of on fault.
    #[bits(1, default = true)]
    pub demand_paging: bool,

    /// `-u`: enable user access to the micro-architectural counters.
    pub uarch_counters: bool,

    #[bits(5)]
    __: u8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootArgsError<'a> {
    #[error("unrecognized option `{0}`")]
    UnknownFlag(&'a str),
    #[error("no user program given")]
    MissingProgram,
}

/// Parsed command line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootArgs<'a> {
    pub flags: BootFlags,
    /// The user program path followed by its arguments.
    pub program_args: &'a [&'a str],
}

impl<'a> BootArgs<'a> {
    /// Parses `args`, which must not include the kernel's own name.
    pub fn parse(args: &'a [&'a str]) -> Result<Self, BootArgsError<'a>> {
        let mut flags = BootFlags::new();
        let mut first = 0;

        for arg in args {
            if !arg.starts_with('-') {
                break;
            }
            match *arg {
                "-s" => flags.set_stats(true),
                "-p" => flags.set_demand_paging(false),
                "-u" => flags.set_uarch_counters(true),
                other => return Err(BootArgsError::UnknownFlag(other)),
            }
            first += 1;
        }

        let program_args = &args[first..];
        if program_args.is_empty() {
            return Err(BootArgsError::MissingProgram);
        }
        Ok(Self {
            flags,
            program_args,
        })
    }

    /// Path of the user program.
    #[must_use]
    pub fn program(&self) -> &'a str {
        self.program_args[0]
    }
}
