use crate::csr::Psr;

/// Emits one instruction trace line at `trace` level.
pub fn trace(time: u64, pc: u32, inst: u32, psr: Psr) {
    tracing::trace!(
        target: "erc32_sim::trace",
        "[{:>10}] pc=0x{:08x} inst=0x{:08x} psr=0x{:08x} cwp={}",
        time,
        pc,
        inst,
        psr.0,
        psr.cwp()
    );
}
