//! Command intake: converts queued move and stop orders into navigation
//! intent and initial path requests. Stops are processed after moves so a
//! move-then-stop issued within one frame leaves the agent idle with no
//! request leaking into the next frame.

use crate::components::{AgentFlags, NavMode, PathRequest};
use crate::World;

/// Two destinations closer than this are treated as the same order.
const SAME_DESTINATION_EPSILON: f32 = 1e-3;

impl World {
    pub(crate) fn stage_command_intake(&mut self) {
        let now = self.time;

        let moves = std::mem::take(&mut self.move_commands);
        for (id, command) in moves {
            let Some(index) = self.agents.index_of(id) else {
                continue;
            };
            let columns = self.agents.columns_mut();
            let position = columns.transforms()[index].position;
            let (_, movement, navigation, _, flags) = columns.split_nav_mut();
            let nav = &mut navigation[index];

            // Re-issuing an unchanged destination while already moving only
            // refreshes the pending request's timestamp.
            let unchanged = nav.has_destination
                && nav.destination.distance(command.destination) <= SAME_DESTINATION_EPSILON;
            if unchanged && movement[index].is_following_path {
                if let Some(request) = self.path_requests.get_mut(id) {
                    request.requested_at = now;
                }
                continue;
            }

            nav.destination = command.destination;
            nav.has_destination = true;
            nav.mode = NavMode::AStar;
            nav.repath_after = now;
            nav.macro_path_done = false;
            flags[index].clear(AgentFlags::FLOW_FOLLOWER);
            self.path_requests.insert(
                id,
                PathRequest {
                    start: position,
                    end: command.destination,
                    priority: command.priority,
                    requested_at: now,
                },
            );
        }

        let stops = std::mem::take(&mut self.stop_commands);
        for (id, ()) in stops {
            let Some(index) = self.agents.index_of(id) else {
                continue;
            };
            let (_, movement, navigation, paths, flags) =
                self.agents.columns_mut().split_nav_mut();
            let nav = &mut navigation[index];
            nav.has_destination = false;
            nav.mode = NavMode::Idle;
            nav.macro_path_done = false;
            movement[index].is_following_path = false;
            movement[index].current_waypoint = 0;
            paths[index].clear();
            flags[index].clear(AgentFlags::FLOW_FOLLOWER);
            self.path_requests.remove(id);
        }
    }
}
