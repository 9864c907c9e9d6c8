use crate::cert::listing::load_descriptors;
use crate::cli::args::{Cli, CompletionCommands, CompletionHelperCommands};
use crate::utils::environment::Environment;
use crate::utils::errors::Result;
use crate::utils::output::OutputFormat;
use crate::utils::paths::PkiLayout;
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::io;

pub fn handle_completion_command(command: &CompletionCommands) -> Result<()> {
    let shell = command.shell();
    let mut cmd = Cli::command();
    let app_name = "certmgr";

    // For bash, add completion of descriptor and environment names first
    if matches!(shell, Shell::Bash) {
        println!("# Enhanced completion for certmgr certificate and environment names");
        print!(
            r#"
_certmgr_complete_certificates() {{
    local names
    names=$(certmgr completion-helper certificates 2>/dev/null)
    COMPREPLY=($(compgen -W "$names" -- "${{cur}}"))
}}

_certmgr_complete_environments() {{
    local names
    names=$(certmgr completion-helper environments 2>/dev/null)
    COMPREPLY=($(compgen -W "$names" -- "${{cur}}"))
}}

# Override the generated completion for specific arguments
_certmgr_override() {{
    local cur prev words cword
    _init_completion || return

    case "$prev" in
        "--env"|"-e")
            _certmgr_complete_environments
            return 0
            ;;
    esac

    case "${{words[*]}}" in
        *"cert create"*|*"cert revoke"*)
            if [[ "$cur" != -* ]]; then
                _certmgr_complete_certificates
                return 0
            fi
            ;;
        *"env info"*|*"env rm"*)
            _certmgr_complete_environments
            return 0
            ;;
    esac

    # Fall back to the original completion
    _certmgr "$@"
}}

"#
        );

        generate(shell, &mut cmd, app_name, &mut io::stdout());

        println!();
        println!("# Override the completion function");
        println!("complete -F _certmgr_override certmgr");
    } else {
        generate(shell, &mut cmd, app_name, &mut io::stdout());
    }

    Ok(())
}

/// Completion candidates; lookup failures print nothing
pub fn handle_completion_helper_command(
    command: &CompletionHelperCommands,
    env_name: &str,
    output: &OutputFormat,
) -> Result<()> {
    match command {
        CompletionHelperCommands::Certificates => {
            if let Ok(env) = Environment::load(env_name) {
                let layout = PkiLayout::from_environment(&env);
                if let Ok(descriptors) = load_descriptors(&layout) {
                    let mut names: Vec<String> = descriptors
                        .into_iter()
                        .map(|d| d.certificate_name)
                        .collect();
                    names.sort();
                    output.print_list(&names);
                }
            }
        }
        CompletionHelperCommands::Environments => {
            if let Ok(names) = Environment::list() {
                output.print_list(&names);
            }
        }
    }

    Ok(())
}
