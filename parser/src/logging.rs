use std::fmt::Write;

/// Level 1 is warnings, 2 is info. Messages at or below `buffer_level` are
/// kept in memory, those at or below `stderr_level` are also printed.
pub struct Logger {
    effective_level: u32,
    buffer_level: u32,
    stderr_level: u32,
    buffer: String,
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Self {
            effective_level: self.effective_level,
            buffer_level: self.buffer_level,
            stderr_level: self.stderr_level,
            buffer: String::new(), // clean logs on clone
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl Logger {
    pub fn new(buffer_level: u32, stderr_level: u32) -> Self {
        Self {
            buffer_level,
            stderr_level,
            effective_level: std::cmp::max(buffer_level, stderr_level),
            buffer: String::new(),
        }
    }

    pub fn warn(&mut self, s: &str) {
        if self.level_enabled(1) {
            self.write_warning("Warning: ");
            self.write_warning(s);
            self.write_warning("\n");
        }
    }

    pub fn info(&mut self, s: &str) {
        if self.level_enabled(2) {
            self.write_level(2, s);
            self.write_level(2, "\n");
        }
    }

    #[inline(always)]
    pub fn level_enabled(&self, level: u32) -> bool {
        level <= self.effective_level
    }

    #[inline(always)]
    pub fn effective_level(&self) -> u32 {
        self.effective_level
    }

    #[inline(always)]
    pub fn buffer_level(&self) -> u32 {
        self.buffer_level
    }

    #[inline(always)]
    pub fn stderr_level(&self) -> u32 {
        self.stderr_level
    }

    pub fn set_buffer_level(&mut self, buffer_level: u32) {
        self.buffer_level = buffer_level;
        self.effective_level = std::cmp::max(self.buffer_level, self.stderr_level);
    }

    pub fn set_stderr_level(&mut self, stderr_level: u32) {
        self.stderr_level = stderr_level;
        self.effective_level = std::cmp::max(self.buffer_level, self.stderr_level);
    }

    pub fn get_buffer(&self) -> &str {
        &self.buffer
    }

    pub fn get_and_clear_logs(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    fn write_level(&mut self, level: u32, s: &str) {
        if level <= self.buffer_level {
            self.buffer.push_str(s);
        }
        if level <= self.stderr_level {
            eprint!("{}", s);
        }
    }

    pub fn write_warning(&mut self, s: &str) {
        self.write_level(1, s);
    }

    /// Sink for `infoln!`.
    pub fn info_logger(&mut self) -> LevelWriter<'_> {
        LevelWriter {
            logger: self,
            level: 2,
        }
    }

    /// Sink for `warn!`.
    pub fn warning_logger(&mut self) -> LevelWriter<'_> {
        LevelWriter {
            logger: self,
            level: 1,
        }
    }
}

pub struct LevelWriter<'a> {
    logger: &'a mut Logger,
    level: u32,
}

impl Write for LevelWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.logger.write_level(self.level, s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Holder {
        logger: Logger,
    }

    #[test]
    fn test_levels_go_to_buffer() {
        let mut h = Holder {
            logger: Logger::new(2, 0),
        };
        crate::infoln!(h, "lists: {}", 3);
        crate::warn!(h, "odd {}", "grammar");
        assert_eq!(
            h.logger.get_and_clear_logs(),
            "lists: 3\nWarning: odd grammar\n"
        );
        assert_eq!(h.logger.get_buffer(), "");
    }

    #[test]
    fn test_info_suppressed_at_warning_level() {
        let mut h = Holder {
            logger: Logger::new(1, 0),
        };
        crate::infoln!(h, "hidden");
        h.logger.warn("shown");
        assert_eq!(h.logger.get_buffer(), "Warning: shown\n");

        h.logger.set_buffer_level(2);
        h.logger.info("now shown");
        assert!(h.logger.get_buffer().ends_with("now shown\n"));
        assert_eq!(h.logger.clone().get_buffer(), "");
    }
}
