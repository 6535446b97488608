//! User-message templates the worker sends to its local agent.

use pi_teams_core::TeamTask;

/// Separator between batched DM texts delivered as a single user message.
pub const DM_SEPARATOR: &str = "\n\n---\n\n";

/// The message that starts work on an assigned or claimed task.
pub fn task_prompt(agent_name: &str, task: &TeamTask) -> String {
    format!(
        "You are teammate '{agent}'.\n\
         You have been assigned task #{id}.\n\
         Subject: {subject}\n\
         \n\
         Description:\n\
         {description}\n\
         \n\
         Do the work now. When finished, reply with a concise summary and any key outputs.",
        agent = agent_name,
        id = task.id,
        subject = task.subject,
        description = task.description,
    )
}
