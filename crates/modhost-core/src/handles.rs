//! Host objects every fresh scope can see as `__platform` and `__container`.

use mlua::{Lua, LuaSerdeExt, SerializeOptions, Table, UserData, UserDataMethods};
use modhost_runtime::bindings;
use tracing::{debug, error, info, trace, warn};

/// `__platform`: facts about the host process
#[derive(Debug, Clone)]
pub struct PlatformHandle {
    name: String,
}

impl PlatformHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl UserData for PlatformHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("name", |_, this, ()| Ok(this.name.clone()));
        methods.add_method("version", |_, _, ()| Ok(env!("CARGO_PKG_VERSION")));
        methods.add_method("log", |_, this, (level, message): (String, String)| {
            log_script_message(&level, &this.name, &message);
            Ok(())
        });
    }
}

/// `__container`: the deployment a script runs in
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    deployment_id: String,
    main: String,
    config: serde_json::Value,
}

impl ContainerHandle {
    pub fn new(
        deployment_id: impl Into<String>,
        main: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            main: main.into(),
            config,
        }
    }
}

impl UserData for ContainerHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("config", |lua, this, ()| {
            let options = SerializeOptions::new()
                .serialize_none_to_null(false)
                .serialize_unit_to_null(false);
            lua.to_value_with(&this.config, options)
        });
        methods.add_method("deployment_id", |_, this, ()| Ok(this.deployment_id.clone()));
        methods.add_method("main", |_, this, ()| Ok(this.main.clone()));
        methods.add_method("log", |_, this, (level, message): (String, String)| {
            log_script_message(&level, &this.deployment_id, &message);
            Ok(())
        });
    }
}

fn log_script_message(level: &str, source: &str, message: &str) {
    match level {
        "trace" => trace!(source = source, "{}", message),
        "debug" => debug!(source = source, "{}", message),
        "warn" => warn!(source = source, "{}", message),
        "error" => error!(source = source, "{}", message),
        _ => info!(source = source, "{}", message),
    }
}

/// Bind both handles into `scope`
pub fn install(
    lua: &Lua,
    scope: &Table,
    platform: PlatformHandle,
    container: ContainerHandle,
) -> mlua::Result<()> {
    scope.raw_set(bindings::PLATFORM, lua.create_userdata(platform)?)?;
    scope.raw_set(bindings::CONTAINER, lua.create_userdata(container)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Value;

    fn scope(lua: &Lua, config: serde_json::Value) -> Table {
        let scope = lua.create_table().unwrap();
        install(
            lua,
            &scope,
            PlatformHandle::new("test-platform"),
            ContainerHandle::new("deployment-1", "main.lua", config),
        )
        .unwrap();
        scope
    }

    fn run(lua: &Lua, scope: &Table, code: &str) -> Value {
        lua.load(code).set_environment(scope.clone()).eval().unwrap()
    }

    #[test]
    fn test_platform_handle() {
        let lua = Lua::new();
        let scope = scope(&lua, serde_json::json!({}));
        let name = run(&lua, &scope, "return __platform:name()");
        assert_eq!(name.as_string().unwrap().to_string_lossy(), "test-platform");
        let version = run(&lua, &scope, "return __platform:version()");
        assert_eq!(version.as_string().unwrap().to_string_lossy(), env!("CARGO_PKG_VERSION"));
        run(&lua, &scope, "__platform:log('warn', 'careful')");
    }

    #[test]
    fn test_container_config_as_table() {
        let lua = Lua::new();
        let scope = scope(
            &lua,
            serde_json::json!({ "port": 8080, "tags": ["a", "b"], "missing": null }),
        );
        let port = run(&lua, &scope, "return __container:config().port");
        assert_eq!(port.as_integer(), Some(8080));
        let tag = run(&lua, &scope, "return __container:config().tags[2]");
        assert_eq!(tag.as_string().unwrap().to_string_lossy(), "b");
        let missing = run(&lua, &scope, "return __container:config().missing");
        assert!(missing.is_nil());
    }

    #[test]
    fn test_container_identity() {
        let lua = Lua::new();
        let scope = scope(&lua, serde_json::json!({}));
        let id = run(
            &lua,
            &scope,
            "return __container:deployment_id() .. ' ' .. __container:main()",
        );
        assert_eq!(id.as_string().unwrap().to_string_lossy(), "deployment-1 main.lua");
    }
}
