//! Calling-convention layouts
//!
//! Each supported target splits arguments between the general-purpose and
//! floating-point register files differently and spills the rest to the
//! stack in declared order. `assign_locations()` applies one layout to a
//! call plan's slots; the trampoline uses it to enforce the stack limit and
//! to trace where every argument travels.

use crate::ffi::plan::ArgSlot;
use crate::ffi::trampoline::TrampolineFault;

/// Maximum number of stack-passed argument slots per call
pub const MAX_STACK_SLOTS: usize = 100;

/// Register budget of one calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiLayout {
    pub name: &'static str,
    /// General-purpose argument registers
    pub int_registers: usize,
    /// Floating-point argument registers
    pub float_registers: usize,
    /// Integer and float arguments consume the same positional registers
    pub shared_positions: bool,
    /// Variadic arguments never use registers
    pub variadic_on_stack: bool,
}

/// System V AMD64: rdi, rsi, rdx, rcx, r8, r9 / xmm0-xmm7
pub const SYSV_X86_64: AbiLayout = AbiLayout {
    name: "sysv-x86_64",
    int_registers: 6,
    float_registers: 8,
    shared_positions: false,
    variadic_on_stack: false,
};

/// Microsoft x64: four positions shared between rcx..r9 and xmm0..xmm3
pub const WIN64: AbiLayout = AbiLayout {
    name: "win64",
    int_registers: 4,
    float_registers: 4,
    shared_positions: true,
    variadic_on_stack: false,
};

/// AAPCS64: x0-x7 / v0-v7
pub const AAPCS64: AbiLayout = AbiLayout {
    name: "aapcs64",
    int_registers: 8,
    float_registers: 8,
    shared_positions: false,
    variadic_on_stack: false,
};

/// Apple arm64: AAPCS64 with every variadic argument on the stack
pub const APPLE_ARM64: AbiLayout = AbiLayout {
    name: "apple-arm64",
    int_registers: 8,
    float_registers: 8,
    shared_positions: false,
    variadic_on_stack: true,
};

/// Everything on the stack
pub const STACK_ONLY: AbiLayout = AbiLayout {
    name: "stack",
    int_registers: 0,
    float_registers: 0,
    shared_positions: false,
    variadic_on_stack: true,
};

#[cfg(all(target_arch = "x86_64", windows))]
const NATIVE: &AbiLayout = &WIN64;
#[cfg(all(target_arch = "x86_64", not(windows)))]
const NATIVE: &AbiLayout = &SYSV_X86_64;
#[cfg(all(target_arch = "aarch64", target_vendor = "apple"))]
const NATIVE: &AbiLayout = &APPLE_ARM64;
#[cfg(all(target_arch = "aarch64", not(target_vendor = "apple")))]
const NATIVE: &AbiLayout = &AAPCS64;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const NATIVE: &AbiLayout = &STACK_ONLY;

/// Layout of the target this crate was compiled for
pub fn native() -> &'static AbiLayout {
    NATIVE
}

/// Where one argument is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    IntRegister(usize),
    FloatRegister(usize),
    /// Index among stack slots, in declared order
    Stack(usize),
}

/// Assign every slot a register or stack position
///
/// Float slots draw from the float file, everything else from the integer
/// file; once a file is exhausted its arguments spill to the stack in
/// declared order. Slots at or past `fixed_count` are variadic.
///
/// # Example
///
/// ```
/// # use dlbind_runtime::ffi::abi::{self, Location};
/// # use dlbind_runtime::ffi::{ArgSlot, SlotClass};
/// let slots = vec![ArgSlot::new(1, SlotClass::Int32); 8];
/// let locations = abi::assign_locations(&abi::SYSV_X86_64, &slots, 8).unwrap();
/// assert_eq!(locations[5], Location::IntRegister(5));
/// assert_eq!(locations[6], Location::Stack(0));
/// ```
pub fn assign_locations(
    layout: &AbiLayout,
    slots: &[ArgSlot],
    fixed_count: usize,
) -> Result<Vec<Location>, TrampolineFault> {
    let mut ints = 0;
    let mut floats = 0;
    let mut stack = 0;
    let mut locations = Vec::with_capacity(slots.len());

    for (index, slot) in slots.iter().enumerate() {
        let variadic = index >= fixed_count;
        let register = if variadic && layout.variadic_on_stack {
            None
        } else if layout.shared_positions {
            (index < layout.int_registers).then(|| {
                if slot.class.is_float() {
                    Location::FloatRegister(index)
                } else {
                    Location::IntRegister(index)
                }
            })
        } else if slot.class.is_float() {
            (floats < layout.float_registers).then(|| {
                floats += 1;
                Location::FloatRegister(floats - 1)
            })
        } else {
            (ints < layout.int_registers).then(|| {
                ints += 1;
                Location::IntRegister(ints - 1)
            })
        };

        let location = match register {
            Some(location) => location,
            None => {
                if stack == MAX_STACK_SLOTS {
                    return Err(TrampolineFault::StackLimit(MAX_STACK_SLOTS));
                }
                stack += 1;
                Location::Stack(stack - 1)
            }
        };
        locations.push(location);
    }

    Ok(locations)
}

/// Number of stack slots a location list uses
pub fn stack_slots(locations: &[Location]) -> usize {
    locations
        .iter()
        .filter(|l| matches!(l, Location::Stack(_)))
        .count()
}
