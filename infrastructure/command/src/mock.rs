use async_trait::async_trait;
use mockall::mock;

use crate::{CommandError, CommandOutput, CommandRunner, CommandSpec};

mock! {
    pub CommandRunner {}
    #[async_trait]
    impl CommandRunner for CommandRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
    }
}
