//! Text reports.

use std::io::{self, Write};

use vma_tree::{Region, StateType, VmaTree};

use crate::{CallStackStorage, MemoryFileTracker, MemorySnapshot, TagTotals, VirtualMemory};

const K: usize = 1024;

/// Bytes to KB, rounded to nearest.
fn kb(bytes: usize) -> usize {
    bytes / K + usize::from(bytes % K >= K / 2)
}

fn write_totals<W: Write>(out: &mut W, t: TagTotals) -> io::Result<()> {
    write!(
        out,
        "reserved={}KB, committed={}KB",
        kb(t.reserved),
        kb(t.committed)
    )
}

fn write_snapshot<W: Write>(out: &mut W, snapshot: &MemorySnapshot) -> io::Result<()> {
    write!(out, "Total: ")?;
    write_totals(out, snapshot.total())?;
    writeln!(out)?;
    for (tag, totals) in snapshot.iter() {
        write!(out, "-{:>26} (", tag.name())?;
        write_totals(out, totals)?;
        writeln!(out, ")")?;
    }
    Ok(())
}

/// Per-tag totals of the address space, then of every memory file.
pub fn write_summary<W: Write>(
    out: &mut W,
    virtual_memory: &VirtualMemory,
    files: &MemoryFileTracker,
) -> io::Result<()> {
    writeln!(out, "Native Memory Tracking:")?;
    writeln!(out)?;
    write_snapshot(out, virtual_memory.snapshot())?;

    let mut files = files.files().peekable();
    if files.peek().is_some() {
        writeln!(out)?;
        writeln!(out, "Memory files:")?;
        for file in files {
            write!(out, "  {} ", file.name())?;
            write_totals(out, file.snapshot().total())?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_region<W: Write>(
    out: &mut W,
    region: &Region,
    stacks: &CallStackStorage,
) -> io::Result<()> {
    writeln!(
        out,
        "[{:#018x} - {:#018x}] {} {}KB for {}",
        region.start,
        region.end,
        region.state.state.name(),
        kb(region.size()),
        region.state.data.tag.name()
    )?;
    if let Some(stack) = stacks.get(region.state.data.stack) {
        writeln!(out, "        from")?;
        for pc in stack.frames() {
            writeln!(out, "          [{pc:#018x}]")?;
        }
    }
    Ok(())
}

fn write_regions<W: Write>(
    out: &mut W,
    tree: &VmaTree,
    stacks: &CallStackStorage,
) -> io::Result<()> {
    let mut result: io::Result<()> = Ok(());
    tree.visit_regions(|region| {
        if result.is_ok() && region.state.state != StateType::Released {
            result = write_region(out, region, stacks);
        }
    });
    result
}

/// Every reserved and committed region with the stack that created it.
pub fn write_detail<W: Write>(
    out: &mut W,
    virtual_memory: &VirtualMemory,
    files: &MemoryFileTracker,
    stacks: &CallStackStorage,
) -> io::Result<()> {
    write_summary(out, virtual_memory, files)?;
    writeln!(out)?;
    writeln!(out, "Virtual memory map:")?;
    write_regions(out, virtual_memory.tree(), stacks)?;
    for file in files.files() {
        writeln!(out)?;
        writeln!(out, "Memory map of {}:", file.name())?;
        write_regions(out, file.tree(), stacks)?;
    }
    Ok(())
}
