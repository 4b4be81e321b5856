//! Virtual machine.
use std::{
    fmt::{self, Write},
    sync::Arc,
    time::Duration,
};

use log::{trace, warn};
use rand::prelude::*;

use crate::{
    bytecode::*,
    constants::*,
    cpu::Chip8Cpu,
    error::{Chip8Error, Chip8Result},
    keypad::{KeyCode, Keypad},
    timer::{TimerDriver, Timers},
};

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    timers: Arc<Timers>,
    keypad: Arc<Keypad>,
    driver: Option<TimerDriver>,
    conf: Chip8Conf,
}

/// Outcome of a single executed instruction, for the outer driver loop.
#[derive(Debug, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1nnn (`JP addr`)
    /// - 2nnn (`CALL addr`)
    /// - Bnnn (`JP V0, addr`)
    /// - 00EE (`RET`)
    Jump,
    /// The display buffer changed and a redraw is pending.
    Draw,
    /// The sound timer was rewritten.
    Sound,
    /// Waiting for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`). The program
    /// counter was rewound so the same instruction runs again next cycle;
    /// the host thread is never blocked.
    KeyWait,
}

/// VM Configuration Parameters.
#[derive(Default, Clone)]
pub struct Chip8Conf {
    pub clock_frequency: Option<Hz>,
    /// `8xy6`/`8xyE` copy VY into VX before shifting (legacy behaviour).
    pub shift_uses_vy: bool,
    /// `Bnnn` offsets by V0 (legacy) instead of VX (`Bxnn`).
    pub jump_uses_v0: bool,
}

/// CPU clock frequency, in hertz (per second)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Hz(pub u64);

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        let timers = Arc::new(Timers::new());
        let keypad = Arc::new(Keypad::new());

        Chip8Vm {
            cpu: Chip8Cpu::new(
                Arc::clone(&timers),
                Arc::clone(&keypad),
                conf.shift_uses_vy,
                conf.jump_uses_v0,
            ),
            timers,
            keypad,
            driver: None,
            conf,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    /// The effective instruction rate, falling back to 700 Hz when the
    /// configured rate is absent or zero.
    pub fn clock_hz(&self) -> Hz {
        match self.conf.clock_frequency {
            Some(freq) if freq.0 > 0 => freq,
            _ => Hz(FALLBACK_CLOCK_HZ),
        }
    }

    /// Start the free-running timer driver.
    ///
    /// Idempotent; the driver ticks until the VM is dropped.
    pub fn initialize(&mut self) -> Chip8Result<()> {
        if self.driver.is_none() {
            self.driver = Some(TimerDriver::start(&self.timers)?);
        }
        Ok(())
    }

    /// Copy a program into memory starting at 0x200 and point the program
    /// counter at it.
    ///
    /// Bytes that would fall outside the 4096-byte memory space are
    /// truncated; memory below 0x200 is never touched.
    pub fn load_rom(&mut self, rom: &[u8]) {
        // Start with clean memory to avoid leaking a previous program.
        self.cpu.clear_memory();

        let len = rom.len().min(MEM_SIZE - MEM_START);
        if len < rom.len() {
            warn!(
                "rom is {} bytes, truncated to the {} that fit in memory",
                rom.len(),
                len
            );
        }
        self.cpu.ram[MEM_START..MEM_START + len].copy_from_slice(&rom[..len]);

        self.cpu.pc = MEM_START;
        self.cpu.redraw = true;
    }

    pub fn display_buffer(&self) -> &[bool; DISPLAY_BUFFER_SIZE] {
        &self.cpu.display
    }

    /// Whether the display changed since the renderer last consumed a frame.
    pub fn should_redraw(&self) -> bool {
        self.cpu.redraw
    }

    /// Acknowledge a consumed frame.
    pub fn clear_redraw(&mut self) {
        self.cpu.redraw = false;
    }

    pub fn program_counter(&self) -> usize {
        self.cpu.pc
    }

    pub fn is_beeping(&self) -> bool {
        self.timers.is_beeping()
    }

    /// Sets the keyboard key input state.
    pub fn set_key(&self, key: KeyCode, pressed: bool) {
        self.keypad.set_key(key.as_u8(), pressed);
    }

    /// Shared handle for the host input loop.
    pub fn keypad(&self) -> Arc<Keypad> {
        Arc::clone(&self.keypad)
    }

    /// Shared handle to the countdown timers.
    pub fn timers(&self) -> Arc<Timers> {
        Arc::clone(&self.timers)
    }
}

/// Interpreter
impl Chip8Vm {
    /// Read the instruction word at the program counter.
    ///
    /// A fetch from outside the memory space yields the no-op word 0x0000
    /// with a diagnostic, rather than corrupting state.
    pub fn fetch(&self) -> u16 {
        match fetch_word(&*self.cpu.ram, self.cpu.pc) {
            Some(word) => word,
            None => {
                warn!("fetch out of bounds: pc=0x{:04X}", self.cpu.pc);
                0x0000
            }
        }
    }

    /// Advance the program counter past the current instruction.
    pub fn advance_pc(&mut self) {
        self.cpu.pc += 2;
    }

    /// Fetch, advance and execute a single instruction.
    pub fn step(&mut self) -> Chip8Result<Flow> {
        let word = self.fetch();
        self.advance_pc();
        self.execute(word)
    }

    /// Run `step_count` fetch-execute cycles back to back.
    pub fn run_steps(&mut self, step_count: usize) -> Chip8Result<Flow> {
        let mut flow = Flow::Ok;
        for _ in 0..step_count {
            flow = self.step()?;
        }
        Ok(flow)
    }

    /// Perform the state transition for one decoded instruction.
    ///
    /// The program counter must already point past the instruction word.
    /// Words that match no documented opcode are deliberately ignored so
    /// ROMs using undefined encodings keep running.
    pub fn execute(&mut self, word: u16) -> Chip8Result<Flow> {
        let vx = op_x(word) as usize;
        let vy = op_y(word) as usize;
        let n = op_n(word);
        let nn = op_nn(word);
        let nnn = op_nnn(word);

        let mut flow = Flow::Ok;

        match op_code(word) {
            0x0 => flow = self.exec_sys(word)?,
            // 1NNN (JP addr)
            //
            // Jump to address.
            0x1 => {
                trace!("{:04X}: JP   {:03X}", self.cpu.pc - 2, nnn);

                self.cpu.pc = nnn as usize;
                flow = Flow::Jump;
            }
            // 2NNN (CALL addr)
            //
            // Call subroutine at NNN. The pushed return address is the
            // already-advanced program counter.
            0x2 => {
                trace!("{:04X}: CALL {:03X}", self.cpu.pc - 2, nnn);

                self.cpu.stack.push(self.cpu.pc as Address);
                self.cpu.pc = nnn as usize;
                flow = Flow::Jump;
            }
            // 3XNN (SE Vx, byte)
            //
            // Skip the next instruction if register VX equals value NN.
            0x3 => {
                if self.cpu.registers[vx] == nn {
                    self.cpu.pc += 2;
                }
            }
            // 4XNN (SNE Vx, byte)
            //
            // Skip the next instruction if register VX does not equal value NN.
            0x4 => {
                if self.cpu.registers[vx] != nn {
                    self.cpu.pc += 2;
                }
            }
            // 5XY0 (SE Vx, Vy)
            //
            // Skip the next instruction if register VX equals register VY.
            0x5 => {
                if self.cpu.registers[vx] == self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // 6XNN (LD Vx, byte)
            //
            // Set register VX to value NN.
            0x6 => {
                self.cpu.registers[vx] = nn;
            }
            // 7XNN (ADD Vx, byte)
            //
            // Add value NN to register VX, wrapping modulo 256.
            // Carry flag is not set.
            0x7 => {
                let x = self.cpu.registers[vx];
                self.cpu.registers[vx] = x.wrapping_add(nn);
            }
            // Arithmetic instructions identified by N
            0x8 => self.exec_math(vx, vy, n),
            // 9XY0 (SNE Vx, Vy)
            //
            // Skip the next instruction if register VX does not equal register VY.
            0x9 => {
                if self.cpu.registers[vx] != self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // ANNN (LD I, addr)
            //
            // Set address register I to value NNN.
            0xA => {
                self.cpu.address = nnn;
            }
            // BNNN (JP V0, addr) / BXNN (JP Vx, addr)
            //
            // Jump to NNN plus an offset register. The legacy dialect
            // always offsets by V0; the modern one offsets by VX.
            0xB => {
                let offset_register = if self.cpu.jump_uses_v0 { 0x0 } else { vx };
                let offset = self.cpu.registers[offset_register] as usize;
                self.cpu.pc = nnn as usize + offset;
                flow = Flow::Jump;
            }
            // CXNN (RND Vx, byte)
            //
            // Set register VX to the bitwise AND of a random byte and NN.
            0xC => {
                self.cpu.registers[vx] = nn & thread_rng().gen::<u8>();
            }
            // DXYN (DRW Vx, Vy, nibble)
            0xD => flow = self.exec_draw(vx, vy, n),
            0xE => self.exec_key(vx, nn),
            0xF => flow = self.exec_misc(vx, nn),
            // Unreachable: op_code is a 4-bit value.
            _ => {}
        }

        Ok(flow)
    }

    /// Execute the 0x0 family, identified by NN.
    ///
    /// `00E0` and `00EE` are distinct opcodes; any other 0NNN word is a
    /// machine-code call on the original hardware and is ignored here.
    fn exec_sys(&mut self, word: u16) -> Chip8Result<Flow> {
        match word {
            // 00E0 (CLS)
            //
            // Clear display
            0x00E0 => {
                trace!("{:04X}: CLS", self.cpu.pc - 2);

                self.cpu.clear_display();
                Ok(Flow::Draw)
            }
            // 00EE (RET)
            //
            // Return from a subroutine by popping the return address off
            // the stack. An empty stack means the program's calls and
            // returns are unbalanced, which is surfaced to the caller
            // instead of silently producing a wrong address.
            0x00EE => {
                trace!("{:04X}: RET", self.cpu.pc - 2);

                match self.cpu.stack.pop() {
                    Some(address) => {
                        self.cpu.pc = address as usize;
                        Ok(Flow::Jump)
                    }
                    None => Err(Chip8Error::EmptyStack {
                        pc: self.cpu.pc as u16,
                    }),
                }
            }
            _ => Ok(Flow::Ok),
        }
    }

    /// Execute an arithmetic instruction, identified by N.
    ///
    /// The flag writes land after the result, so VF holds the flag even
    /// when it is also the destination register.
    fn exec_math(&mut self, vx: usize, vy: usize, n: u8) {
        match n {
            // 8XY0 (LD Vx, Vy)
            //
            // Store the value of register VY in register VX.
            0x0 => {
                self.cpu.registers[vx] = self.cpu.registers[vy];
            }
            // 8XY1 (OR Vx, Vy)
            //
            // Performs bitwise OR on VX and VY, and stores the result in VX.
            0x1 => {
                self.cpu.registers[vx] |= self.cpu.registers[vy];
            }
            // 8XY2 (AND Vx, Vy)
            //
            // Performs bitwise AND on VX and VY, and stores the result in VX.
            0x2 => {
                self.cpu.registers[vx] &= self.cpu.registers[vy];
            }
            // 8XY3 (XOR Vx, Vy)
            //
            // Performs bitwise XOR on VX and VY, and stores the result in VX.
            0x3 => {
                self.cpu.registers[vx] ^= self.cpu.registers[vy];
            }
            // 8XY4 (ADD Vx, Vy)
            //
            // Adds VY to VX. Overflow is wrapped.
            // If overflow, set VF to 1, else 0.
            0x4 => {
                let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);
                let (result, carry) = x.overflowing_add(y);
                self.cpu.registers[vx] = result;
                self.cpu.registers[0xF] = carry as u8;
            }
            // 8XY5 (SUB Vx, Vy)
            //
            // Subtracts VY from VX, wrapping.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            0x5 => {
                let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);
                let (result, borrow) = x.overflowing_sub(y);
                self.cpu.registers[vx] = result;
                self.cpu.registers[0xF] = !borrow as u8;
            }
            // 8XY6 (SHR Vx)
            //
            // Shift right by 1 with the shifted-out bit in VF.
            // The legacy dialect shifts VY's value instead of VX's own.
            0x6 => {
                let x = if self.cpu.shift_uses_vy {
                    self.cpu.registers[vy]
                } else {
                    self.cpu.registers[vx]
                };
                self.cpu.registers[vx] = x >> 1;
                self.cpu.registers[0xF] = x & 1;
            }
            // 8XY7 (SUBN Vx, Vy)
            //
            // Subtracts VX from VY, storing the result in VX.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            0x7 => {
                let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);
                let (result, borrow) = y.overflowing_sub(x);
                self.cpu.registers[vx] = result;
                self.cpu.registers[0xF] = !borrow as u8;
            }
            // 8XYE (SHL Vx)
            //
            // Shift left by 1 with the shifted-out bit in VF.
            // The legacy dialect shifts VY's value instead of VX's own.
            0xE => {
                let x = if self.cpu.shift_uses_vy {
                    self.cpu.registers[vy]
                } else {
                    self.cpu.registers[vx]
                };
                self.cpu.registers[vx] = x << 1;
                self.cpu.registers[0xF] = (x >> 7) & 1;
            }
            // Unmapped variant; ignored.
            _ => {}
        }
    }

    /// DXYN (DRW Vx, Vy, nibble)
    ///
    /// Draw an 8-pixel-wide, N-row sprite from memory at I, at the
    /// coordinate in registers VX and VY taken modulo the display size.
    /// Pixels are combined with XOR; erasing a lit pixel records a
    /// collision in VF. Sprites clip at the display edges rather than
    /// wrapping mid-draw.
    fn exec_draw(&mut self, vx: usize, vy: usize, n: u8) -> Flow {
        let start_x = self.cpu.registers[vx] as usize % DISPLAY_WIDTH;
        let mut y = self.cpu.registers[vy] as usize % DISPLAY_HEIGHT;

        self.cpu.registers[0xF] = 0;

        for row in 0..n as usize {
            let sprite_address = self.cpu.address as usize + row;
            let Some(&sprite) = self.cpu.ram.get(sprite_address) else {
                warn!(
                    "DRW: sprite read out of bounds: I=0x{:04X}, row={}",
                    self.cpu.address, row
                );
                break;
            };

            // Each sprite byte is one row of 8 pixels, most significant
            // bit leftmost. Columns past the right edge are clipped, but
            // the row itself still completes.
            let mut x = start_x;
            for bit in 0..8 {
                if x >= DISPLAY_WIDTH {
                    break;
                }
                let pixel = (sprite >> (7 - bit)) & 1 == 1;
                let index = x + y * DISPLAY_WIDTH;
                let old_pixel = self.cpu.display[index];

                if pixel && old_pixel {
                    self.cpu.registers[0xF] = 1;
                }
                self.cpu.display[index] = old_pixel ^ pixel;

                x += 1;
            }

            y += 1;
            if y >= DISPLAY_HEIGHT {
                break;
            }
        }

        self.cpu.redraw = true;
        Flow::Draw
    }

    /// Execute the 0xE family of keyboard skips, identified by NN.
    fn exec_key(&mut self, vx: usize, nn: u8) {
        match nn {
            // EX9E (SKP Vx)
            //
            // Skip the next instruction if the key in VX is pressed.
            0x9E => {
                if self.cpu.keypad.is_pressed(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            // EXA1 (SKNP Vx)
            //
            // Skip the next instruction if the key in VX is not pressed.
            0xA1 => {
                if !self.cpu.keypad.is_pressed(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            _ => {}
        }
    }

    /// Execute the 0xF family of miscellaneous instructions, identified by NN.
    fn exec_misc(&mut self, vx: usize, nn: u8) -> Flow {
        let mut flow = Flow::Ok;

        match nn {
            // FX07 (LD Vx, DT)
            //
            // Set Vx = delay timer value.
            0x07 => {
                self.cpu.registers[vx] = self.cpu.timers.delay();
            }
            // FX0A (LD Vx, K)
            //
            // Wait for a key press and store the key value in VX. While no
            // key is down, rewind the program counter so this instruction
            // runs again next cycle. The host thread is never suspended.
            0x0A => {
                if let Some(key) = self.cpu.keypad.first_pressed() {
                    self.cpu.registers[vx] = key;
                } else {
                    self.cpu.pc -= 2;
                    flow = Flow::KeyWait;
                }
            }
            // FX15 (LD DT, Vx)
            //
            // Set delay timer = Vx.
            0x15 => {
                self.cpu.timers.set_delay(self.cpu.registers[vx]);
            }
            // FX18 (LD ST, Vx)
            //
            // Set sound timer = Vx. The buzzer stays on while it counts down.
            0x18 => {
                self.cpu.timers.set_sound(self.cpu.registers[vx]);
                flow = Flow::Sound;
            }
            // FX1E (ADD I, Vx)
            //
            // Add Vx to I. VF is set to 1 when the sum leaves the 12-bit
            // address range, else 0.
            0x1E => {
                let old = self.cpu.address;
                self.cpu.address = old.wrapping_add(self.cpu.registers[vx] as Address);
                self.cpu.registers[0xF] =
                    (old <= 0x0FFF && self.cpu.address > 0x0FFF) as u8;
            }
            // FX29 (LD F, Vx)
            //
            // Set I to the font glyph for the low nibble of Vx.
            0x29 => {
                let digit = self.cpu.registers[vx] & 0xF;
                self.cpu.address = (FONTSET_START + digit as usize * FONTSET_HEIGHT) as Address;
            }
            // FX33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx in the
            // memory locations I, I+1, and I+2.
            #[rustfmt::skip]
            0x33 => {
                let address = self.cpu.address as usize;
                let x = self.cpu.registers[vx];
                if address + 2 < MEM_SIZE {
                    self.cpu.ram[address]     = x / 100 % 10;
                    self.cpu.ram[address + 1] = x / 10  % 10;
                    self.cpu.ram[address + 2] = x       % 10;
                } else {
                    warn!("FX33: I out of bounds: I=0x{:04X}", self.cpu.address);
                }
            }
            // FX55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at I.
            // I itself is left unmodified.
            0x55 => {
                let address = self.cpu.address as usize;
                if address + vx < MEM_SIZE {
                    self.cpu.ram[address..=address + vx]
                        .copy_from_slice(&self.cpu.registers[0..=vx]);
                } else {
                    warn!(
                        "FX55: I+X out of bounds: I=0x{:04X}, X=0x{:X}",
                        self.cpu.address, vx
                    );
                }
            }
            // FX65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at I.
            // I itself is left unmodified.
            0x65 => {
                let address = self.cpu.address as usize;
                if address + vx < MEM_SIZE {
                    self.cpu.registers[0..=vx]
                        .copy_from_slice(&self.cpu.ram[address..=address + vx]);
                } else {
                    warn!(
                        "FX65: I+X out of bounds: I=0x{:04X}, X=0x{:X}",
                        self.cpu.address, vx
                    );
                }
            }
            _ => {}
        }

        flow
    }
}

/// Troubleshooting
#[doc(hidden)]
impl Chip8Vm {
    /// Returns the contents of program memory as a human readable string.
    pub fn dump_ram(&self, count: usize) -> Result<String, fmt::Error> {
        let iter = self
            .cpu
            .ram
            .iter()
            .enumerate()
            .skip(MEM_START)
            .take(count)
            .step_by(2);
        let mut buf = String::new();

        for (i, op) in iter {
            writeln!(buf, "{:04X}: {:02X}{:02X}", i, op, self.cpu.ram[i + 1])?;
        }

        Ok(buf)
    }

    /// Renders the display buffer as rows of `#` and `.` characters.
    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.cpu.display[x + y * DISPLAY_WIDTH] {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }
}
