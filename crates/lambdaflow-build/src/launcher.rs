//! Function launcher script
//!
//! The function's handler is a shell script that prepares the library path
//! for native extensions in the layer and then replaces itself with the ASGI
//! server, bound to the port the web adapter forwards requests to.

use crate::error::{BuildError, Result};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    /// ASGI application in `module:attribute` form
    pub app: String,
    pub port: u16,
    pub workers: u32,
    /// Prepended to `LD_LIBRARY_PATH`
    pub library_path: String,
    pub python: String,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            app: "server:app".to_string(),
            port: Self::DEFAULT_PORT,
            workers: 1,
            library_path: "/opt/python/lib".to_string(),
            python: "python".to_string(),
        }
    }
}

impl Launcher {
    pub const FILE_NAME: &'static str = "run.sh";
    pub const DEFAULT_PORT: u16 = 8080;

    pub fn validate(&self) -> Result<()> {
        let Some((module, attribute)) = self.app.split_once(':') else {
            return Err(BuildError::InvalidConfig(format!(
                "launcher app '{}' must look like module:attribute",
                self.app
            )));
        };
        if module.is_empty() || attribute.is_empty() {
            return Err(BuildError::InvalidConfig(format!(
                "launcher app '{}' must look like module:attribute",
                self.app
            )));
        }
        if self.port == 0 {
            return Err(BuildError::InvalidConfig(
                "launcher port must not be 0".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(BuildError::InvalidConfig(
                "launcher needs at least one worker".to_string(),
            ));
        }
        Ok(())
    }

    pub fn render(&self) -> Result<String> {
        self.validate()?;

        let mut script = String::from("#!/bin/bash\n");
        // Writing to a String cannot fail
        let _ = writeln!(
            script,
            "export LD_LIBRARY_PATH=\"{}:$LD_LIBRARY_PATH\"",
            self.library_path
        );
        let _ = writeln!(
            script,
            "exec {} -m uvicorn --port={} --workers={} {}",
            self.python, self.port, self.workers, self.app
        );
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_script() {
        let script = Launcher::default().render().unwrap();
        assert_eq!(
            script,
            "#!/bin/bash\n\
             export LD_LIBRARY_PATH=\"/opt/python/lib:$LD_LIBRARY_PATH\"\n\
             exec python -m uvicorn --port=8080 --workers=1 server:app\n"
        );
    }

    #[test]
    fn test_custom_workers_and_app() {
        let launcher = Launcher {
            app: "mcp.main:application".to_string(),
            workers: 4,
            ..Default::default()
        };
        let script = launcher.render().unwrap();
        assert!(script.contains("--workers=4 mcp.main:application"));
        assert!(script.contains("--port=8080"));
    }

    #[test]
    fn test_invalid_launchers() {
        let no_attribute = Launcher {
            app: "server".to_string(),
            ..Default::default()
        };
        assert!(no_attribute.validate().is_err());

        let no_workers = Launcher {
            workers: 0,
            ..Default::default()
        };
        assert!(no_workers.render().is_err());
    }
}
