mod file_spill;
mod memory_pressure;
