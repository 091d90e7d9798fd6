//! ARM64 `rt_sigframe` construction and parsing.
//!
//! Frame layout from the frame base (16-byte aligned, becomes the handler's
//! SP):
//!
//! ```text
//!   +0     siginfo (128)
//!   +128   ucontext: uc_flags, uc_link, uc_stack, uc_sigmask
//!   +304   sigcontext: fault_address, x0..x30, sp, pc, pstate
//!   +592   __reserved[4096]: record chain, {0,0} terminated
//!   ...    extra area (only when records overflow __reserved)
//!   top    {fp, lr} frame record
//! ```
//!
//! Records are allocated in order fpsimd, esr, sve, tpidr2, za. When the
//! next record does not fit in `__reserved` an `extra` record and a
//! terminator are placed there, and the remaining records continue in an
//! extra area that starts immediately after that terminator.

use super::constants::*;
use super::context::Aarch64Regs;
use super::CpuFeatures;
use crate::arch_impl::traits::{FrameContext, FrameLayout, HandlerEntry, RestoredFrame};
use crate::memory::GuestMemory;
use crate::signal::frame::{align_up, FrameError, FrameReader, FrameWriter, Record, RecordWalker};
use crate::signal::types::{PendingSignal, StackT};

/// Placement of every record for one frame. Offsets are from the frame base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aarch64FrameLayout {
    pub fpsimd: usize,
    pub esr: Option<usize>,
    /// Offset, size
    pub sve: Option<(usize, usize)>,
    pub tpidr2: Option<usize>,
    /// Offset, size
    pub za: Option<(usize, usize)>,
    /// Offset of the extra record in `__reserved`
    pub extra: Option<usize>,
    /// Start of the extra area
    pub extra_base: usize,
    /// Offset of the final terminator
    pub end: usize,
    /// Size of the rt_sigframe including any extra area
    pub sigframe_size: usize,
}

impl Aarch64FrameLayout {
    /// Offset of the `{fp, lr}` record
    pub fn frame_record(&self) -> usize {
        self.sigframe_size
    }
}

impl FrameLayout for Aarch64FrameLayout {
    fn size(&self) -> u64 {
        (self.sigframe_size + FRAME_RECORD_SIZE) as u64
    }
}

/// Record allocator mirroring the kernel's sigframe_alloc
struct RecordAlloc {
    size: usize,
    limit: usize,
    extra: Option<usize>,
    extra_base: usize,
}

impl RecordAlloc {
    fn new() -> Self {
        RecordAlloc {
            size: SC_RESERVED_OFFSET,
            // Always leave room for an extra record and the terminator
            limit: SIGFRAME_SIZE - TERMINATOR_SIZE - EXTRA_SIZE,
            extra: None,
            extra_base: 0,
        }
    }

    fn alloc(&mut self, size: usize) -> usize {
        let padded = align_up(size as u64, RECORD_ALIGN as u64) as usize;
        if self.extra.is_none() && padded > self.limit - self.size {
            self.extra = Some(self.size);
            self.size += EXTRA_SIZE;
            // __reserved terminator
            self.size += TERMINATOR_SIZE;
            self.extra_base = self.size;
            self.limit = SIGFRAME_MAXSZ - TERMINATOR_SIZE;
        }
        let offset = self.size;
        self.size += padded;
        offset
    }
}

/// Size of an SVE record carrying a full payload for `vl` bytes
pub fn sve_record_size(vl: usize) -> usize {
    let vq = vl / VQ_BYTES;
    align_up((16 + 546 * vq) as u64, 16) as usize
}

/// Offsets of the Z, P and FFR payloads inside an SVE record
fn sve_payload(vl: usize) -> (usize, usize, usize) {
    let z = 16;
    let p = z + 32 * vl;
    let ffr = p + 16 * (vl / 8);
    (z, p, ffr)
}

/// Vector length and flags an SVE record is written with, and whether it
/// carries a payload.
fn sve_state(regs: &Aarch64Regs, features: &CpuFeatures) -> Option<(usize, u16, bool)> {
    if regs.streaming() {
        return Some((regs.vl(), SVE_SIG_FLAG_SM, true));
    }
    match (features.sve_vl, features.sme_vl) {
        (Some(_), _) => Some((regs.vl(), 0, true)),
        (None, Some(_)) => Some((0, 0, false)),
        (None, None) => None,
    }
}

pub fn layout(
    regs: &Aarch64Regs,
    signal: &PendingSignal,
    features: &CpuFeatures,
) -> Aarch64FrameLayout {
    let mut alloc = RecordAlloc::new();

    let fpsimd = alloc.alloc(FPSIMD_SIZE);
    let esr = signal.syndrome.map(|_| alloc.alloc(ESR_SIZE));
    let sve = sve_state(regs, features).map(|(vl, _, payload)| {
        let size = if payload { sve_record_size(vl) } else { 16 };
        (alloc.alloc(size), size)
    });
    let sme = features.sme_vl.is_some();
    let tpidr2 = sme.then(|| alloc.alloc(TPIDR2_SIZE));
    let za = sme.then(|| {
        let size = if regs.za_enabled() {
            16 + regs.svl() * regs.svl()
        } else {
            16
        };
        (alloc.alloc(size), size)
    });
    let end = alloc.alloc(TERMINATOR_SIZE);

    let sigframe_size = align_up(alloc.size.max(SIGFRAME_SIZE) as u64, 16) as usize;
    Aarch64FrameLayout {
        fpsimd,
        esr,
        sve,
        tpidr2,
        za,
        extra: alloc.extra,
        extra_base: alloc.extra_base,
        end,
        sigframe_size,
    }
}

pub fn write(
    buf: &mut [u8],
    layout: &Aarch64FrameLayout,
    ctx: &FrameContext<'_, Aarch64Regs>,
    features: &CpuFeatures,
) -> Result<(), FrameError> {
    let regs = ctx.regs;
    let mut w = FrameWriter::new(buf);

    if ctx.siginfo {
        w.put_bytes(SIGINFO_OFFSET, &ctx.signal.encode_siginfo())?;
    }

    // ucontext
    w.put_u64(UC_FLAGS_OFFSET, 0)?;
    w.put_u64(UC_LINK_OFFSET, 0)?;
    w.put_bytes(UC_STACK_OFFSET, &ctx.alt_stack.to_guest_bytes())?;
    w.put_u64(UC_SIGMASK_OFFSET, ctx.saved_mask)?;

    // sigcontext
    let fault_address = if ctx.signal.is_fault() {
        ctx.signal.addr
    } else {
        0
    };
    w.put_u64(SC_FAULT_ADDRESS_OFFSET, fault_address)?;
    for (i, x) in regs.x.iter().enumerate() {
        w.put_u64(SC_REGS_OFFSET + 8 * i, *x)?;
    }
    w.put_u64(SC_SP_OFFSET, regs.sp)?;
    w.put_u64(SC_PC_OFFSET, regs.pc)?;
    w.put_u64(SC_PSTATE_OFFSET, regs.pstate())?;

    // fpsimd_context
    let off = layout.fpsimd;
    w.put_record_header(off, FPSIMD_MAGIC, FPSIMD_SIZE as u32)?;
    w.put_u32(off + 8, regs.fpsr)?;
    w.put_u32(off + 12, regs.fpcr)?;
    for i in 0..32 {
        w.put_u128(off + 16 + 16 * i, regs.vreg(i))?;
    }

    if let (Some(off), Some(esr)) = (layout.esr, ctx.signal.syndrome) {
        w.put_record_header(off, ESR_MAGIC, ESR_SIZE as u32)?;
        w.put_u64(off + 8, esr)?;
    }

    let sve = sve_state(regs, features);
    if let (Some((off, size)), Some((vl, flags, payload))) = (layout.sve, sve) {
        w.put_record_header(off, SVE_MAGIC, size as u32)?;
        w.put_u16(off + 8, vl as u16)?;
        w.put_u16(off + 10, flags)?;
        if payload {
            let (z, p, ffr) = sve_payload(vl);
            w.put_bytes(off + z, regs.zregs())?;
            w.put_bytes(off + p, regs.pregs())?;
            w.put_bytes(off + ffr, regs.ffr())?;
        }
    }

    if let Some(off) = layout.tpidr2 {
        w.put_record_header(off, TPIDR2_MAGIC, TPIDR2_SIZE as u32)?;
        w.put_u64(off + 8, regs.tpidr2)?;
    }

    if let Some((off, size)) = layout.za {
        w.put_record_header(off, ZA_MAGIC, size as u32)?;
        w.put_u16(off + 8, regs.svl() as u16)?;
        if size > 16 {
            w.put_bytes(off + 16, regs.za())?;
        }
    }

    if let Some(off) = layout.extra {
        let extra_size = layout.sigframe_size.max(layout.end + TERMINATOR_SIZE) - layout.extra_base;
        w.put_record_header(off, EXTRA_MAGIC, EXTRA_SIZE as u32)?;
        w.put_u64(off + 8, ctx.frame_addr + layout.extra_base as u64)?;
        w.put_u32(off + 16, extra_size as u32)?;
    }

    // Terminators are left zero by the caller's zeroed buffer.

    let record = layout.frame_record();
    w.put_u64(record, regs.x[29])?;
    w.put_u64(record + 8, regs.x[30])?;
    Ok(())
}

/// Redirect `regs` into a handler whose frame was written at `entry.frame_addr`.
pub fn enter_handler(
    regs: &mut Aarch64Regs,
    entry: &HandlerEntry,
    layout: &Aarch64FrameLayout,
    features: &CpuFeatures,
) {
    regs.x[0] = u64::from(entry.signo);
    if entry.siginfo {
        regs.x[1] = entry.frame_addr + SIGINFO_OFFSET as u64;
        regs.x[2] = entry.frame_addr + UCONTEXT_OFFSET as u64;
    }
    regs.x[29] = entry.frame_addr + layout.frame_record() as u64;
    regs.x[30] = entry.return_addr;
    regs.sp = entry.frame_addr;
    regs.pc = entry.handler_pc;

    if features.bti {
        // BTYPE_C: the handler is entered as if by BLR
        regs.btype = 2;
    }

    if features.sme_vl.is_some() {
        if regs.streaming() {
            regs.reset_vectors(features.normal_vl());
        }
        regs.svcr &= !(SVCR_SM | SVCR_ZA);
        regs.za_mut().fill(0);
    }
}

fn bad_size(record: Record) -> FrameError {
    FrameError::BadRecordSize {
        magic: record.magic,
        size: record.size,
    }
}

/// A record the live CPU has no state for
fn unexpected(record: Record) -> FrameError {
    FrameError::UnknownRecord {
        magic: record.magic,
        offset: record.offset,
    }
}

/// Walk the record chain of the frame at `frame`, reading the extra area
/// if there is one. Returns the whole frame buffer and the records in it.
fn read_records(
    frame: u64,
    memory: &dyn GuestMemory,
) -> Result<(Vec<u8>, Vec<Record>), FrameError> {
    let mut buf = vec![0u8; SIGFRAME_SIZE];
    memory.read(frame, &mut buf)?;

    let mut walker = RecordWalker::new(&KNOWN_RECORDS, RECORD_ALIGN);
    let mut records = walker.walk(&FrameReader::new(&buf), SC_RESERVED_OFFSET, SIGFRAME_SIZE)?;

    let Some(pos) = records.iter().position(|r| r.magic == EXTRA_MAGIC) else {
        return Ok((buf, records));
    };
    let extra = records[pos];
    let reader = FrameReader::new(&buf);
    let datap = reader.u64(extra.offset + 8)?;
    if pos + 1 != records.len() || extra.size as usize != EXTRA_SIZE {
        return Err(FrameError::BadExtraArea { datap });
    }
    let extra_size = reader.u32(extra.offset + 16)? as usize;

    // The area must start right after the __reserved terminator
    let base = extra.offset + extra.size as usize + TERMINATOR_SIZE;
    if datap != frame.wrapping_add(base as u64)
        || datap % RECORD_ALIGN as u64 != 0
        || extra_size % RECORD_ALIGN != 0
        || extra_size > SIGFRAME_MAXSZ - base
    {
        return Err(FrameError::BadExtraArea { datap });
    }

    let total = (base + extra_size).max(SIGFRAME_SIZE);
    let mut full = vec![0u8; total];
    memory.read(frame, &mut full)?;
    // The guest may have changed the frame between the two reads
    if full[..SIGFRAME_SIZE] != buf[..] {
        return Err(FrameError::BadExtraArea { datap });
    }
    let more = walker.walk(&FrameReader::new(&full), base, base + extra_size)?;
    records.extend(more);
    Ok((full, records))
}

pub fn restore(
    regs: &Aarch64Regs,
    memory: &dyn GuestMemory,
    features: &CpuFeatures,
) -> Result<RestoredFrame<Aarch64Regs>, FrameError> {
    let frame = regs.sp;
    if frame % 16 != 0 {
        return Err(FrameError::Misaligned { addr: frame });
    }

    let (buf, records) = read_records(frame, memory)?;
    let r = FrameReader::new(&buf);
    let find = |magic: u32| records.iter().find(|rec| rec.magic == magic).copied();

    let mut new = regs.clone();
    for i in 0..31 {
        new.x[i] = r.u64(SC_REGS_OFFSET + 8 * i)?;
    }
    new.sp = r.u64(SC_SP_OFFSET)?;
    new.pc = r.u64(SC_PC_OFFSET)?;
    new.set_pstate(r.u64(SC_PSTATE_OFFSET)?);

    let Some(fpsimd) = find(FPSIMD_MAGIC) else {
        return Err(FrameError::MissingRecord {
            magic: FPSIMD_MAGIC,
        });
    };
    if fpsimd.size as usize != FPSIMD_SIZE {
        return Err(bad_size(fpsimd));
    }
    new.fpsr = r.u32(fpsimd.offset + 8)?;
    new.fpcr = r.u32(fpsimd.offset + 12)?;

    let sve_payload_restored = match find(SVE_MAGIC) {
        Some(sve) => restore_sve(&mut new, &r, sve, features)?,
        None => {
            new.svcr &= !SVCR_SM;
            if new.vl() != features.normal_vl() {
                new.reset_vectors(features.normal_vl());
            }
            false
        }
    };
    if !sve_payload_restored {
        for i in 0..32 {
            new.set_vreg(i, r.u128(fpsimd.offset + 16 + 16 * i)?);
        }
    }

    if let Some(tpidr2) = find(TPIDR2_MAGIC) {
        if features.sme_vl.is_none() {
            return Err(unexpected(tpidr2));
        }
        if tpidr2.size as usize != TPIDR2_SIZE {
            return Err(bad_size(tpidr2));
        }
        new.tpidr2 = r.u64(tpidr2.offset + 8)?;
    }

    if let Some(za) = find(ZA_MAGIC) {
        restore_za(&mut new, &r, za, features)?;
    }

    let blocked = r.u64(UC_SIGMASK_OFFSET)?;
    let mut stack = [0u8; StackT::GUEST_SIZE];
    stack.copy_from_slice(r.bytes(UC_STACK_OFFSET, StackT::GUEST_SIZE)?);

    Ok(RestoredFrame {
        regs: new,
        blocked,
        alt_stack: StackT::from_guest_bytes(&stack),
    })
}

/// Returns true if Z/P/FFR came from the record.
fn restore_sve(
    new: &mut Aarch64Regs,
    r: &FrameReader<'_>,
    sve: Record,
    features: &CpuFeatures,
) -> Result<bool, FrameError> {
    let saved_vl = r.u16(sve.offset + 8)? as usize;
    let flags = r.u16(sve.offset + 10)?;
    let streaming = flags & SVE_SIG_FLAG_SM != 0;

    let live_vl = if streaming {
        features.sme_vl
    } else {
        features.sve_vl.or(features.sme_vl.map(|_| 0))
    };
    let live_vl = match live_vl {
        Some(vl) => usize::from(vl),
        None => return Err(unexpected(sve)),
    };
    if saved_vl != live_vl {
        return Err(FrameError::VectorLengthMismatch {
            saved: saved_vl as u32,
            live: live_vl as u32,
        });
    }

    if sve.size == 16 {
        // Header only: no live SVE state
        new.svcr &= !SVCR_SM;
        if new.vl() != features.normal_vl() {
            new.reset_vectors(features.normal_vl());
        }
        return Ok(false);
    }
    if (sve.size as usize) < sve_record_size(live_vl) || live_vl == 0 {
        return Err(bad_size(sve));
    }

    if streaming {
        new.svcr |= SVCR_SM;
    } else {
        new.svcr &= !SVCR_SM;
    }
    if new.vl() != live_vl {
        new.reset_vectors(live_vl);
    }
    let (z, p, ffr) = sve_payload(live_vl);
    let zregs = r.bytes(sve.offset + z, new.zregs().len())?;
    let pregs = r.bytes(sve.offset + p, new.pregs().len())?;
    let ffr = r.bytes(sve.offset + ffr, new.ffr().len())?;
    new.zregs_mut().copy_from_slice(zregs);
    new.pregs_mut().copy_from_slice(pregs);
    new.ffr_mut().copy_from_slice(ffr);
    Ok(true)
}

fn restore_za(
    new: &mut Aarch64Regs,
    r: &FrameReader<'_>,
    za: Record,
    features: &CpuFeatures,
) -> Result<(), FrameError> {
    let Some(svl) = features.sme_vl.map(usize::from) else {
        return Err(unexpected(za));
    };
    let saved_vl = r.u16(za.offset + 8)? as usize;
    if saved_vl != svl {
        return Err(FrameError::VectorLengthMismatch {
            saved: saved_vl as u32,
            live: svl as u32,
        });
    }
    if za.size == 16 {
        new.svcr &= !SVCR_ZA;
        new.za_mut().fill(0);
        return Ok(());
    }
    if (za.size as usize) < 16 + svl * svl {
        return Err(bad_size(za));
    }
    let len = new.za().len();
    new.za_mut().copy_from_slice(r.bytes(za.offset + 16, len)?);
    new.svcr |= SVCR_ZA;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FlatGuestMemory, PROT_READ, PROT_WRITE};
    use crate::signal::constants::{SEGV_MAPERR, SIGSEGV};

    const FRAME: u64 = 0x10000;

    fn features(sve: Option<u16>, sme: Option<u16>) -> CpuFeatures {
        CpuFeatures {
            sve_vl: sve,
            sme_vl: sme,
            bti: false,
        }
    }

    /// An fpsimd record followed by an `extra` record of `size` bytes whose
    /// area holds just a terminator
    fn frame_with_extra(size: u32) -> (FlatGuestMemory, u64) {
        let mut buf = vec![0u8; 0x2000];
        let mut w = FrameWriter::new(&mut buf);
        let fpsimd = SC_RESERVED_OFFSET;
        w.put_record_header(fpsimd, FPSIMD_MAGIC, FPSIMD_SIZE as u32)
            .unwrap();
        let extra = fpsimd + FPSIMD_SIZE;
        let base = extra + size as usize + TERMINATOR_SIZE;
        let datap = FRAME + base as u64;
        w.put_record_header(extra, EXTRA_MAGIC, size).unwrap();
        w.put_u64(extra + 8, datap).unwrap();
        w.put_u32(extra + 16, TERMINATOR_SIZE as u32).unwrap();

        let mem = FlatGuestMemory::new();
        mem.map(FRAME, 0x2000, PROT_READ | PROT_WRITE).unwrap();
        mem.write(FRAME, &buf).unwrap();
        (mem, datap)
    }

    #[test]
    fn test_plain_layout_fits_reserved() {
        let f = features(None, None);
        let regs = Aarch64Regs::new(16, 0);
        let l = layout(&regs, &PendingSignal::kernel(10), &f);
        assert_eq!(l.fpsimd, SC_RESERVED_OFFSET);
        assert_eq!(l.end, SC_RESERVED_OFFSET + FPSIMD_SIZE);
        assert_eq!(l.extra, None);
        assert_eq!(l.sigframe_size, SIGFRAME_SIZE);
        assert_eq!(l.size(), (SIGFRAME_SIZE + FRAME_RECORD_SIZE) as u64);
    }

    #[test]
    fn test_esr_record_only_with_syndrome() {
        let f = features(None, None);
        let regs = Aarch64Regs::new(16, 0);
        let fault = PendingSignal::fault_with_syndrome(SIGSEGV, SEGV_MAPERR, 0, 0x9200_0005);
        assert!(layout(&regs, &fault, &f).esr.is_some());
        let plain = PendingSignal::fault(SIGSEGV, SEGV_MAPERR, 0);
        assert!(layout(&regs, &plain, &f).esr.is_none());
    }

    #[test]
    fn test_sve_record_size() {
        // vq = 1: 16 + 546 rounded to 16
        assert_eq!(sve_record_size(16), 576);
        assert_eq!(sve_record_size(256), 16 + 546 * 16);
    }

    #[test]
    fn test_large_sve_spills_to_extra_area() {
        let f = features(Some(256), None);
        let regs = Aarch64Regs::new(256, 0);
        let l = layout(&regs, &PendingSignal::kernel(10), &f);
        let extra = l.extra.unwrap();
        assert_eq!(extra, SC_RESERVED_OFFSET + FPSIMD_SIZE);
        assert_eq!(l.extra_base, extra + EXTRA_SIZE + TERMINATOR_SIZE);
        assert_eq!(l.sve.unwrap().0, l.extra_base);
        assert!(l.sigframe_size > SIGFRAME_SIZE);
        assert_eq!(l.sigframe_size % 16, 0);
    }

    #[test]
    fn test_sme_only_non_streaming_header_record() {
        let f = features(None, Some(32));
        let regs = Aarch64Regs::new(16, 32);
        let l = layout(&regs, &PendingSignal::kernel(10), &f);
        assert_eq!(l.sve.map(|(_, size)| size), Some(16));
        assert!(l.tpidr2.is_some());
        assert_eq!(l.za.map(|(_, size)| size), Some(16));
    }

    #[test]
    fn test_extra_record_read() {
        let (mem, _) = frame_with_extra(EXTRA_SIZE as u32);
        let (buf, records) = read_records(FRAME, &mem).unwrap();
        assert_eq!(buf.len(), SIGFRAME_SIZE);
        let magics: Vec<u32> = records.iter().map(|r| r.magic).collect();
        assert_eq!(magics, vec![FPSIMD_MAGIC, EXTRA_MAGIC]);
    }

    #[test]
    fn test_oversized_extra_record_rejected() {
        let (mem, datap) = frame_with_extra(EXTRA_SIZE as u32 + 16);
        assert_eq!(
            read_records(FRAME, &mem).unwrap_err(),
            FrameError::BadExtraArea { datap }
        );
    }
}
