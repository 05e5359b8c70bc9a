use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::Program;
use crate::VmError;
use crate::program::Op;

const MAX_CALL_DEPTH: usize = 1 << 20;

/// Result of one [`Machine::step`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The budget ran out before the program finished.
    Suspended,
    /// `end` executed or control fell off the end of the program.
    Complete,
    Error(VmError),
}

enum Flow {
    Next,
    Goto(usize),
    Halt,
}

#[derive(Debug)]
pub struct Machine {
    program: Program,
    pc: usize,
    stack: Vec<i64>,
    heap: HashMap<i64, i64>,
    calls: Vec<usize>,
    input: Vec<char>,
    input_pos: usize,
    output: String,
    steps: u64,
    halted: bool,
    fault: Option<VmError>,
    trace: Option<BTreeMap<&'static str, u64>>,
}

impl Machine {
    /// Creates a machine over `program`. `stdin` is the complete input the
    /// program may read.
    pub fn new(program: Program, stdin: &str) -> Self {
        Self {
            program,
            pc: 0,
            stack: Vec::new(),
            heap: HashMap::new(),
            calls: Vec::new(),
            input: stdin.chars().collect(),
            input_pos: 0,
            output: String::new(),
            steps: 0,
            halted: false,
            fault: None,
            trace: None,
        }
    }

    /// Records how many times each instruction executes.
    pub fn with_trace(mut self) -> Self {
        self.trace = Some(BTreeMap::new());
        self
    }

    pub fn total_steps(&self) -> u64 {
        self.steps
    }

    pub fn is_complete(&self) -> bool {
        self.halted
    }

    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Per-instruction execution counts, when tracing is enabled.
    pub fn traced(&self) -> Option<&BTreeMap<&'static str, u64>> {
        self.trace.as_ref()
    }

    /// Takes the output produced since the last flush.
    pub fn flush_stdout(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Executes at most `budget` instructions.
    pub fn step(&mut self, budget: u64) -> StepOutcome {
        if let Some(fault) = &self.fault {
            return StepOutcome::Error(fault.clone());
        }
        if self.halted {
            return StepOutcome::Complete;
        }
        for _ in 0..budget {
            let Some(op) = self.program.op(self.pc) else {
                self.halted = true;
                return StepOutcome::Complete;
            };
            self.steps += 1;
            if let Some(trace) = self.trace.as_mut() {
                let name = self
                    .program
                    .instructions()
                    .get(self.pc)
                    .map_or("?", |instruction| instruction.opcode().mnemonic());
                *trace.entry(name).or_default() += 1;
            }
            match self.execute(op) {
                Ok(Flow::Next) => self.pc += 1,
                Ok(Flow::Goto(target)) => self.pc = target,
                Ok(Flow::Halt) => {
                    self.halted = true;
                    return StepOutcome::Complete;
                }
                Err(err) => {
                    self.fault = Some(err.clone());
                    return StepOutcome::Error(err);
                }
            }
        }
        StepOutcome::Suspended
    }

    fn pop(&mut self, opcode: &'static str) -> Result<i64, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow {
            pc: self.pc,
            opcode,
        })
    }

    fn peek(&self, depth: usize, opcode: &'static str) -> Result<i64, VmError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index).copied())
            .ok_or(VmError::StackUnderflow {
                pc: self.pc,
                opcode,
            })
    }

    fn arithmetic(
        &mut self,
        opcode: &'static str,
        apply: impl FnOnce(i64, i64) -> Result<Option<i64>, VmError>,
    ) -> Result<Flow, VmError> {
        let rhs = self.pop(opcode)?;
        let lhs = self.pop(opcode)?;
        let value = apply(lhs, rhs)?.ok_or(VmError::Overflow {
            pc: self.pc,
            opcode,
        })?;
        self.stack.push(value);
        Ok(Flow::Next)
    }

    fn read_char(&mut self) -> Result<i64, VmError> {
        let ch = self
            .input
            .get(self.input_pos)
            .copied()
            .ok_or(VmError::EndOfInput)?;
        self.input_pos += 1;
        Ok(i64::from(u32::from(ch)))
    }

    fn read_line(&mut self) -> Result<String, VmError> {
        if self.input_pos >= self.input.len() {
            return Err(VmError::EndOfInput);
        }
        let mut line = String::new();
        while let Some(ch) = self.input.get(self.input_pos).copied() {
            self.input_pos += 1;
            if ch == '\n' {
                break;
            }
            line.push(ch);
        }
        Ok(line)
    }

    fn execute(&mut self, op: Op) -> Result<Flow, VmError> {
        let pc = self.pc;
        match op {
            Op::Push(value) => self.stack.push(value),
            Op::Duplicate => {
                let top = self.peek(0, "dup")?;
                self.stack.push(top);
            }
            Op::Copy(n) => {
                let depth = usize::try_from(n).map_err(|_| VmError::InvalidOperand {
                    pc,
                    opcode: "copy",
                    value: n,
                })?;
                let value = self.peek(depth, "copy")?;
                self.stack.push(value);
            }
            Op::Swap => {
                let top = self.pop("swap")?;
                let below = self.pop("swap")?;
                self.stack.push(top);
                self.stack.push(below);
            }
            Op::Discard => {
                self.pop("drop")?;
            }
            Op::Slide(n) => {
                let count = usize::try_from(n).map_err(|_| VmError::InvalidOperand {
                    pc,
                    opcode: "slide",
                    value: n,
                })?;
                let top = self.pop("slide")?;
                let keep = self
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or(VmError::StackUnderflow { pc, opcode: "slide" })?;
                self.stack.truncate(keep);
                self.stack.push(top);
            }
            Op::Add => return self.arithmetic("add", |a, b| Ok(a.checked_add(b))),
            Op::Subtract => return self.arithmetic("sub", |a, b| Ok(a.checked_sub(b))),
            Op::Multiply => return self.arithmetic("mul", |a, b| Ok(a.checked_mul(b))),
            Op::Divide => {
                return self.arithmetic("div", |a, b| {
                    if b == 0 {
                        return Err(VmError::DivisionByZero { pc });
                    }
                    Ok(floor_div(a, b))
                });
            }
            Op::Modulo => {
                return self.arithmetic("mod", |a, b| {
                    if b == 0 {
                        return Err(VmError::DivisionByZero { pc });
                    }
                    Ok(floor_mod(a, b))
                });
            }
            Op::Store => {
                let value = self.pop("store")?;
                let address = self.pop("store")?;
                self.heap.insert(address, value);
            }
            Op::Retrieve => {
                let address = self.pop("retrieve")?;
                let value = self.heap.get(&address).copied().unwrap_or_default();
                self.stack.push(value);
            }
            Op::Mark => {}
            Op::Call(target) => {
                if self.calls.len() >= MAX_CALL_DEPTH {
                    return Err(VmError::CallStackOverflow {
                        limit: MAX_CALL_DEPTH,
                    });
                }
                self.calls.push(pc + 1);
                return Ok(Flow::Goto(target));
            }
            Op::Jump(target) => return Ok(Flow::Goto(target)),
            Op::JumpIfZero(target) => {
                if self.pop("jz")? == 0 {
                    return Ok(Flow::Goto(target));
                }
            }
            Op::JumpIfNegative(target) => {
                if self.pop("jn")? < 0 {
                    return Ok(Flow::Goto(target));
                }
            }
            Op::Return => {
                let target = self
                    .calls
                    .pop()
                    .ok_or(VmError::CallStackUnderflow { pc })?;
                return Ok(Flow::Goto(target));
            }
            Op::End => return Ok(Flow::Halt),
            Op::OutputChar => {
                let value = self.pop("putc")?;
                let ch = u32::try_from(value)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(VmError::InvalidCharCode(value))?;
                self.output.push(ch);
            }
            Op::OutputNumber => {
                let value = self.pop("putn")?;
                self.output.push_str(&value.to_string());
            }
            Op::ReadChar => {
                let address = self.pop("getc")?;
                let value = self.read_char()?;
                self.heap.insert(address, value);
            }
            Op::ReadNumber => {
                let address = self.pop("getn")?;
                let line = self.read_line()?;
                let value = line
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| VmError::InvalidNumberInput(line.clone()))?;
                self.heap.insert(address, value);
            }
        }
        Ok(Flow::Next)
    }
}

/// Division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

/// Remainder taking the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let remainder = a.checked_rem(b)?;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        remainder.checked_add(b)
    } else {
        Some(remainder)
    }
}
