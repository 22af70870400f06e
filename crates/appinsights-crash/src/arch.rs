//! CPU architecture naming
//!
//! Reports carry Mach-style `(cpu_type, cpu_subtype)` pairs.

use appinsights_core::domain::ProcessorInfo;

pub const CPU_ARCH_ABI64: u64 = 0x0100_0000;
const CPU_SUBTYPE_MASK: u64 = 0xff00_0000;

pub const CPU_TYPE_X86: u64 = 7;
pub const CPU_TYPE_X86_64: u64 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u64 = 12;
pub const CPU_TYPE_ARM64: u64 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

pub const CPU_SUBTYPE_X86_ALL: u64 = 3;
pub const CPU_SUBTYPE_ARM_V6: u64 = 6;
pub const CPU_SUBTYPE_ARM_V7: u64 = 9;
pub const CPU_SUBTYPE_ARM_V7S: u64 = 11;
pub const CPU_SUBTYPE_ARM64_ALL: u64 = 0;
pub const CPU_SUBTYPE_ARM64_V8: u64 = 1;
pub const CPU_SUBTYPE_ARM64E: u64 = 2;

/// Human-readable architecture name, or `None` for unrecognized pairs.
pub fn architecture_name(processor: ProcessorInfo) -> Option<&'static str> {
    let subtype = processor.cpu_subtype & !CPU_SUBTYPE_MASK;
    let name = match (processor.cpu_type, subtype) {
        (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E) => "arm64e",
        (CPU_TYPE_ARM64, _) => "arm64",
        (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V6) => "armv6",
        (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7) => "armv7",
        (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7S) => "armv7s",
        (CPU_TYPE_ARM, _) => "arm",
        (CPU_TYPE_X86_64, _) => "x86_64",
        (CPU_TYPE_X86, _) => "i386",
        _ => return None,
    };
    Some(name)
}

/// Whether pointers are 64 bits wide for this processor.
pub fn is_64_bit(processor: ProcessorInfo) -> bool {
    processor.cpu_type & CPU_ARCH_ABI64 != 0
}

/// Zero-padded hex address: 16 digits for 64-bit, 8 for 32-bit.
pub fn format_address(address: u64, is_64_bit: bool) -> String {
    if is_64_bit {
        format!("0x{address:016x}")
    } else {
        format!("0x{:08x}", address & 0xffff_ffff)
    }
}

/// Processor pair for the architecture this binary was compiled for.
pub fn host_processor() -> Option<ProcessorInfo> {
    let (cpu_type, cpu_subtype) = match std::env::consts::ARCH {
        "x86_64" => (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_ALL),
        "x86" => (CPU_TYPE_X86, CPU_SUBTYPE_X86_ALL),
        "aarch64" => (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL),
        "arm" => (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7),
        _ => return None,
    };
    Some(ProcessorInfo {
        cpu_type,
        cpu_subtype,
    })
}
