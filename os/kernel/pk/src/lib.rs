//! # Proxy Kernel
//!
//! Runs one statically linked RISC-V program in user mode. The kernel owns a
//! single address space ([`Vm`]) and a descriptor table; everything the
//! program asks for that is not memory management goes to the host.
//!
//! ```text
//!  platform entry ──→ ProxyKernel::boot ──→ start_user(program, argv)
//!                           │                   │
//!                           │        load_elf ──┤── StackBuilder
//!                           ↓                   ↓
//!  trap handler ──→ handle_page_fault     syscall(nr, args)
//!                           │                   │
//!                           └──────→ Vm ←───────┘
//! ```
//!
//! The crate is `no_std`; the platform layer supplies the physical mapper,
//! the memory layout and the console sink.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod elf;
pub mod stack;
pub mod trap;

use crate::elf::loader::{LoadedImage, load_elf};
use crate::elf::{ElfError, PHDR_SIZE};
use crate::stack::{AuxKey, StackBuilder, StackError};
use crate::trap::FaultOutcome;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use kernel_alloc::{BackingFile, MapFlags, PageAllocError, Prot, Vm, VmConfig, VmStats};
use kernel_console::{ConsoleLogger, ConsoleSink, console_print};
use kernel_info::boot::BootFlags;
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_registers::scause::Scause;
use kernel_syscall::{Errno, FileTable, MmSyscalls, Sysno};
use kernel_vmem::{LeafPerms, PhysMapper};
use log::{LevelFilter, error, info};

/// Upper bound for a single `pread64`/`write`; larger requests are short.
pub const MAX_IO: usize = 64 * 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootError {
    #[error("unusable page pool: {0}")]
    Pool(#[from] PageAllocError),
    #[error("cannot load the program: {0}")]
    Elf(#[from] ElfError),
    #[error("cannot set up the user stack: {0}")]
    Stack(#[from] StackError),
}

/// Where user mode starts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserEntry {
    pub pc: VirtualAddress,
    pub sp: VirtualAddress,
    pub image: LoadedImage,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyscallResult {
    /// Value for `a0`.
    Return(u64),
    /// The program asked to exit with this status.
    Exit(i32),
}

/// Registers the console logger. A second call keeps the first logger.
pub fn init_console(sink: ConsoleSink, level: LevelFilter) {
    // already registered: keep it
    let _ = ConsoleLogger::init(sink, level);
}

pub struct ProxyKernel<M: PhysMapper + Clone> {
    vm: Vm<M>,
    files: FileTable,
    flags: BootFlags,
    memory: MemoryLayout,
}

impl<M: PhysMapper + Clone> ProxyKernel<M> {
    /// Sets up the VM core over the page pool of `memory` and maps the kernel
    /// image.
    ///
    /// # Errors
    /// [`BootError::Pool`] if the pool range is unusable.
    ///
    /// # Panics
    /// If the kernel image cannot be mapped.
    pub fn boot(mapper: M, memory: MemoryLayout, flags: BootFlags) -> Result<Self, BootError> {
        let (pool_start, pool_end) = memory.pool_range();
        info!(
            "{} KiB RAM at {}, page pool {pool_start}..{pool_end} ({} pages)",
            memory.mem_size() / 1024,
            memory.dram_base(),
            memory.pool_pages()
        );
        info!(
            "demand paging {}, stats {}, user counters {}",
            flags.demand_paging(),
            flags.stats(),
            flags.uarch_counters()
        );

        let config = VmConfig {
            demand_paging: flags.demand_paging(),
            table_pages: memory.page_table_pages(),
            ..VmConfig::default()
        };
        let vm = Vm::new(mapper, pool_start, pool_end, memory.mmap_max(), config)?;

        let (kernel, len) = memory.kernel_range();
        let kernel_va = VirtualAddress::new(kernel.as_u64());
        if let Err(e) = vm.map_kernel_range(kernel_va, kernel, len, LeafPerms::RWX) {
            error!("cannot map the kernel image: {e}");
            panic!("kernel image mapping failed: {e}");
        }

        Ok(Self {
            vm,
            files: FileTable::new(),
            flags,
            memory,
        })
    }

    #[must_use]
    pub const fn vm(&self) -> &Vm<M> {
        &self.vm
    }

    #[must_use]
    pub const fn files(&self) -> &FileTable {
        &self.files
    }

    #[must_use]
    pub const fn flags(&self) -> BootFlags {
        self.flags
    }

    /// Loads `program`, maps and fills the user stack below `mmap_max`.
    ///
    /// # Errors
    /// If the program cannot be loaded or the stack does not fit.
    pub fn start_user(
        &self,
        program: &Arc<dyn BackingFile>,
        argv: &[&str],
    ) -> Result<UserEntry, BootError> {
        let mut vm = self.vm.lock();
        let image = load_elf(&mut vm, program)?;

        let top = self.memory.mmap_max();
        let size = self.memory.user_stack_pages() * PAGE_SIZE;
        let bottom = vm
            .mmap(
                top - size,
                size,
                Prot::RW,
                MapFlags::FIXED | MapFlags::PRIVATE | MapFlags::ANONYMOUS,
                None,
                0,
            )
            .map_err(StackError::from)?;

        let auxv = [
            (AuxKey::Phdr, image.phdr.as_u64()),
            (AuxKey::Phent, PHDR_SIZE as u64),
            (AuxKey::Phnum, u64::from(image.phnum)),
            (AuxKey::Pagesz, PAGE_SIZE),
            (AuxKey::Entry, image.entry.as_u64()),
        ];
        let sp = StackBuilder::new(&mut vm, bottom, top).finish(argv, &auxv)?;

        info!("user entry {} sp {sp}", image.entry);
        Ok(UserEntry {
            pc: image.entry,
            sp,
            image,
        })
    }

    /// Switches the hart to the user address space.
    ///
    /// # Safety
    /// See [`kernel_alloc::VmState::activate`].
    ///
    /// # Errors
    /// If the root table cannot be allocated.
    #[cfg(target_arch = "riscv64")]
    pub unsafe fn activate(&self) -> Result<(), kernel_alloc::VmError> {
        unsafe { self.vm.lock().activate() }
    }

    /// See [`trap::handle_page_fault`].
    pub fn handle_page_fault(&self, cause: Scause, tval: u64) -> Option<FaultOutcome> {
        trap::handle_page_fault(&self.vm, cause, tval)
    }

    pub fn syscall(&self, nr: u64, args: [u64; 6]) -> SyscallResult {
        let mm = MmSyscalls::new(&self.vm, &self.files);
        if let Some(ret) = mm.dispatch(nr, args) {
            return SyscallResult::Return(ret);
        }

        #[allow(clippy::cast_possible_truncation)]
        let fd = args[0] as i32;
        let ret = match Sysno::try_from(nr) {
            #[allow(clippy::cast_possible_truncation)]
            Ok(Sysno::Exit | Sysno::ExitGroup) => return SyscallResult::Exit(args[0] as i32),
            Ok(Sysno::Close) => self.files.close(fd).map(|()| 0),
            Ok(Sysno::Pread64) => self.pread(fd, VirtualAddress::new(args[1]), args[2], args[3]),
            Ok(Sysno::Write) => self.write(fd, VirtualAddress::new(args[1]), args[2]),
            _ => {
                log::debug!("unsupported syscall {nr}");
                Err(Errno::ENOSYS)
            }
        };
        SyscallResult::Return(ret.unwrap_or_else(Errno::as_return))
    }

    fn pread(&self, fd: i32, buf: VirtualAddress, count: u64, offset: u64) -> Result<u64, Errno> {
        let file = self.files.get(fd)?;
        let len = usize::try_from(count).map_or(MAX_IO, |c| c.min(MAX_IO));
        let mut data = vec![0u8; len];
        let n = file.read_at(&mut data, offset).map_err(|e| Errno(e.errno))?;
        self.vm.lock().write_user(buf, &data[..n])?;
        Ok(n as u64)
    }

    /// Console output for stdout and stderr.
    fn write(&self, fd: i32, buf: VirtualAddress, count: u64) -> Result<u64, Errno> {
        if fd != 1 && fd != 2 {
            return Err(Errno::EBADF);
        }
        let len = usize::try_from(count).map_or(MAX_IO, |c| c.min(MAX_IO));
        let mut data = vec![0u8; len];
        self.vm.lock().read_user(buf, &mut data)?;
        console_print!("{}", String::from_utf8_lossy(&data));
        Ok(len as u64)
    }

    /// Final statistics, logged when booted with `-s`.
    pub fn shutdown(&self, code: i32) -> VmStats {
        let stats = self.vm.stats();
        if self.flags.stats() {
            let census = self.vm.lock().census();
            let (reserve_free, reserve_total) = self.vm.table_reserve();
            info!("exit {code}: {stats}");
            info!(
                "{} tables ({reserve_free}/{reserve_total} reserve pages free), {} resident, {} pending, {} free pages, {:?}",
                census.tables,
                census.resident,
                census.pending,
                self.vm.free_pages(),
                self.vm.lock_stats()
            );
        }
        stats
    }
}
