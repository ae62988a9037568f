use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::debug;

use super::reservation::ReservationTable;
use super::Solver;
use crate::action::{Action, JointAction};
use crate::algorithm::{Cost, HeuristicSearch, Search, SearchDomain, Shaping};
use crate::geometry::{
    direction_to, neighbours, translate, Direction, Position, PositionTime, Tick, ALL_DIRECTIONS,
};
use crate::map::{in_bounds, Tile};
use crate::predictor::Predictor;
use crate::world::{AgentId, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AgentAction {
    North,
    East,
    South,
    West,
    Stay,
    Unassigned,
}

impl AgentAction {
    fn from_direction(d: Direction) -> Self {
        match d {
            Direction::North => AgentAction::North,
            Direction::East => AgentAction::East,
            Direction::South => AgentAction::South,
            Direction::West => AgentAction::West,
        }
    }

    fn direction(self) -> Option<Direction> {
        match self {
            AgentAction::North => Some(Direction::North),
            AgentAction::East => Some(Direction::East),
            AgentAction::South => Some(Direction::South),
            AgentAction::West => Some(Direction::West),
            AgentAction::Stay | AgentAction::Unassigned => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AgentStateRecord {
    /// Post-move position.
    position: Position,
    id: AgentId,
    action: AgentAction,
}

impl AgentStateRecord {
    /// The cell the agent occupied before its assigned move.
    fn pre_move(&self) -> Position {
        match self.action.direction() {
            Some(d) => translate(self.position, d.inverse()),
            None => self.position,
        }
    }
}

/// One node of the joint search: every agent's (possibly pending) position
/// for the current round. `next_agent == 0` means the state is full — every
/// agent has acted and all pending actions are reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AgentsState {
    agents: Vec<AgentStateRecord>,
    next_agent: usize,
}

impl AgentsState {
    fn is_full(&self) -> bool {
        self.next_agent == 0
    }
}

/// Open/closed key of the joint search: the state plus its depth, compared
/// with *partial* equality. Two partial states whose agents sit on the same
/// cells are conflated even when they got there by different moves, unless
/// some undecided agent is close enough to one of the differing pre-move
/// cells to be able to tell them apart.
#[derive(Debug, Clone)]
struct PartialStateTime {
    state: AgentsState,
    time: Cost,
}

fn partial_state_equal(lhs: &AgentsState, rhs: &AgentsState) -> bool {
    if lhs.agents.len() != rhs.agents.len() || lhs.next_agent != rhs.next_agent {
        return false;
    }

    for i in 0..lhs.agents.len() {
        let (a, b) = (&lhs.agents[i], &rhs.agents[i]);
        if a.position != b.position || a.id != b.id {
            return false;
        }

        if a.action != b.action {
            debug_assert!(a.action != AgentAction::Unassigned);
            debug_assert!(b.action != AgentAction::Unassigned);

            let a_pre = a.pre_move();
            let b_pre = b.pre_move();

            for j in (i + 1)..lhs.agents.len() {
                if lhs.agents[j].action != AgentAction::Unassigned {
                    continue;
                }
                if neighbours(lhs.agents[j].position, a_pre)
                    || neighbours(rhs.agents[j].position, b_pre)
                {
                    return false;
                }
            }
        }
    }

    true
}

impl PartialEq for PartialStateTime {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && partial_state_equal(&self.state, &other.state)
    }
}

impl Eq for PartialStateTime {}

impl Hash for PartialStateTime {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        // Actions are deliberately left out so that conflated states land in
        // the same bucket.
        for record in &self.state.agents {
            record.position.hash(hasher);
            record.id.hash(hasher);
        }
        self.state.next_agent.hash(hasher);
        self.time.hash(hasher);
    }
}

/// Assign the next undecided agent every move that does not conflict with
/// the agents already decided this round.
fn state_successors(state: &AgentsState, w: &World) -> Vec<AgentsState> {
    let mut result = Vec::new();
    let agent = &state.agents[state.next_agent];
    debug_assert_eq!(agent.action, AgentAction::Unassigned);

    let mut add = |action: AgentAction, destination: Position| {
        let mut next = state.clone();
        next.agents[state.next_agent].action = action;
        next.agents[state.next_agent].position = destination;
        next.next_agent = (next.next_agent + 1) % next.agents.len();
        if next.next_agent == 0 {
            for record in &mut next.agents {
                record.action = AgentAction::Unassigned;
            }
        }
        result.push(next);
    };

    for d in ALL_DIRECTIONS {
        let destination = translate(agent.position, d);
        if !in_bounds(destination, w.map()) || w.get(destination) == Tile::Wall {
            continue;
        }

        let mut possible = true;
        for other in &state.agents {
            if other.action == AgentAction::Unassigned {
                break;
            }

            if other.action == AgentAction::Stay {
                if destination == other.position {
                    possible = false;
                    break;
                }
            } else if destination == other.position
                || (destination == other.pre_move() && other.position == agent.position)
            {
                // Vertex conflict, or a head-on swap with an earlier mover.
                possible = false;
                break;
            }
        }

        if possible {
            add(AgentAction::from_direction(d), destination);
        }
    }

    let mut needs_vacate = false;
    for other in &state.agents {
        if other.action == AgentAction::Unassigned {
            break;
        }
        if other.position == agent.position && other.id != agent.id {
            needs_vacate = true;
            break;
        }
    }
    if !needs_vacate {
        add(AgentAction::Stay, agent.position);
    }

    result
}

struct OdDomain<'a> {
    start: AgentsState,
    tick: Tick,
    heuristics: &'a mut HashMap<AgentId, HeuristicSearch>,
    predictor: Option<Rc<RefCell<dyn Predictor>>>,
    threshold: f64,
}

impl SearchDomain for OdDomain<'_> {
    type State = AgentsState;
    type Coord = PartialStateTime;

    fn successors(&mut self, state: &AgentsState, w: &World) -> Vec<AgentsState> {
        state_successors(state, w)
    }

    fn passable(
        &mut self,
        state: &AgentsState,
        _from: &AgentsState,
        w: &World,
        distance: Cost,
    ) -> bool {
        // Operator depth to whole-round depth.
        let steps = 1 + distance / state.agents.len() as Cost;

        for record in &state.agents {
            if let Some(predictor) = &self.predictor {
                let predicted = predictor
                    .borrow()
                    .predict_obstacle(PositionTime::new(record.position, self.tick + steps));
                if predicted > self.threshold {
                    return false;
                }
            }

            if w.get(record.position) == Tile::Obstacle {
                if let Some(start_record) =
                    self.start.agents.iter().find(|r| r.id == record.id)
                {
                    if neighbours(start_record.position, record.position) {
                        return false;
                    }
                }
            }
        }

        true
    }

    fn heuristic(&mut self, state: &AgentsState, w: &World, _g: Cost) -> Option<Cost> {
        let mut result = 0;
        for record in &state.agents {
            let oracle = self.heuristics.get_mut(&record.id)?;
            result += oracle.find_distance(record.position, w)?;
        }
        Some(result)
    }

    fn coordinate(&self, state: &AgentsState, g: Cost) -> PartialStateTime {
        PartialStateTime {
            state: state.clone(),
            time: g,
        }
    }

    fn closable(&self, coord: &PartialStateTime) -> bool {
        coord.state.is_full()
    }
}

fn make_action(from: &AgentsState, to: &AgentsState) -> JointAction {
    debug_assert_eq!(from.agents.len(), to.agents.len());

    let mut result = JointAction::new();
    for (f, t) in from.agents.iter().zip(&to.agents) {
        debug_assert_eq!(f.id, t.id);
        if f.position != t.position {
            result.add(Action::new(f.position, direction_to(f.position, t.position)));
        }
    }
    result
}

type GroupId = u32;

/// A set of agents planned jointly. `plan` is reversed: the final full state
/// sits at index 0 and the current one at the back.
#[derive(Debug)]
struct Group {
    plan: Vec<AgentsState>,
    starting_positions: Vec<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Admissibility {
    Admissible,
    Incomplete,
    Invalid,
}

/// Operator decomposition: a joint A* that assigns one agent's move per
/// expansion. Agents start in singleton groups; groups whose plans collide
/// in the reservation tables are merged and replanned together, so the
/// joint search is only ever as wide as an actual conflict requires.
pub struct Od {
    groups: BTreeMap<GroupId, Group>,
    next_group_id: GroupId,
    reservations: ReservationTable<GroupId>,
    heuristics: HashMap<AgentId, HeuristicSearch>,
    predictor: Option<Rc<RefCell<dyn Predictor>>>,
    window: Cost,
    obstacle_penalty: u32,
    obstacle_threshold: f64,
    should_stop: Arc<AtomicBool>,
    replans: u32,
    plan_invalid: u32,
    nodes_primary: usize,
    nodes_heuristic: usize,
    max_group_size: usize,
}

impl Od {
    pub fn new(
        window: Cost,
        predictor: Option<Rc<RefCell<dyn Predictor>>>,
        obstacle_penalty: u32,
        obstacle_threshold: f64,
        should_stop: Arc<AtomicBool>,
    ) -> Self {
        Od {
            groups: BTreeMap::new(),
            next_group_id: 0,
            reservations: ReservationTable::new(),
            heuristics: HashMap::new(),
            predictor,
            window,
            obstacle_penalty,
            obstacle_threshold,
            should_stop,
            replans: 0,
            plan_invalid: 0,
            nodes_primary: 0,
            nodes_heuristic: 0,
            max_group_size: 0,
        }
    }

    fn heuristic_nodes(&self) -> usize {
        self.heuristics.values().map(|h| h.nodes_expanded()).sum()
    }

    fn make_heuristic_searches(&mut self, w: &World) {
        self.heuristics.clear();

        let mut positions: Vec<Position> = w.agents().keys().copied().collect();
        positions.sort();

        for pos in positions {
            let agent = w.agents()[&pos];
            let shaping = self.predictor.as_ref().map(|p| Shaping {
                predictor: p.clone(),
                base_tick: w.tick(),
                penalty: self.obstacle_penalty,
            });
            self.heuristics.insert(
                agent.id(),
                HeuristicSearch::new(agent.goal, pos, self.should_stop.clone(), shaping),
            );
        }
    }

    fn is_final(&self, state: &AgentsState, w: &World) -> bool {
        state.agents.iter().all(|record| {
            w.get_agent(record.position)
                .is_some_and(|a| a.goal == record.position)
        })
    }

    fn plans_admissible(&self, w: &World) -> Admissibility {
        let mut result = Admissibility::Admissible;

        for group in self.groups.values() {
            if group.plan.len() < 2 {
                if group.plan.is_empty() || !self.is_final(&group.plan[0], w) {
                    result = result.max(Admissibility::Incomplete);
                }
                continue;
            }

            let next_state = &group.plan[group.plan.len() - 2];
            if next_state
                .agents
                .iter()
                .any(|record| w.get(record.position) == Tile::Obstacle)
            {
                return Admissibility::Invalid;
            }
        }

        result
    }

    fn replan(&mut self, w: &World) {
        self.replans += 1;
        self.groups.clear();
        self.reservations.clear();
        self.make_heuristic_searches(w);

        let old_heuristic_nodes = self.heuristic_nodes();

        let mut starts: Vec<Position> = w.agents().keys().copied().collect();
        starts.sort();
        for pos in starts {
            self.groups.insert(
                self.next_group_id,
                Group {
                    plan: Vec::new(),
                    starting_positions: vec![pos],
                },
            );
            self.next_group_id += 1;
        }

        while self.replan_groups(w) {
            if self.should_stop.load(AtomicOrdering::Relaxed) {
                break;
            }
        }

        self.nodes_heuristic += self.heuristic_nodes() - old_heuristic_nodes;
    }

    /// Plan every group that lacks a plan, then walk the fresh plan against
    /// the reservation tables. A conflict merges all involved groups into
    /// one and restarts the pass; a clean walk reserves the plan. Returns
    /// whether a merge happened.
    fn replan_groups(&mut self, w: &World) -> bool {
        let ids: Vec<GroupId> = self.groups.keys().copied().collect();

        for id in ids {
            if !self.groups[&id].plan.is_empty() {
                continue;
            }

            let plan = self.replan_group(w, id);
            if self.should_stop.load(AtomicOrdering::Relaxed) {
                return false;
            }
            self.groups.get_mut(&id).unwrap().plan = plan;

            let mut conflicts: Vec<GroupId> = Vec::new();
            {
                let plan = &self.groups[&id].plan;
                let mut time = w.tick();

                for (si, state) in plan.iter().rev().enumerate() {
                    let prev_state = (si > 0).then(|| &plan[plan.len() - si]);
                    let is_last = si == plan.len() - 1;

                    for (i, record) in state.agents.iter().enumerate() {
                        let from = prev_state.map(|p| p.agents[i].position);
                        let mut conflicting = self.reservations.find_conflict(
                            record.position,
                            from,
                            time,
                            is_last,
                        );
                        if conflicting.is_none() && is_last {
                            conflicting = self
                                .reservations
                                .find_permanent_conflict(record.position, time);
                        }

                        if let Some(other) = conflicting {
                            debug_assert_ne!(other, id);
                            if !conflicts.contains(&other) {
                                conflicts.push(other);
                            }
                        }
                    }

                    time += 1;
                }
            }

            if conflicts.is_empty() {
                self.reserve_plan(id, w.tick());
            } else {
                conflicts.push(id);
                self.merge_groups(&conflicts);
                return true;
            }
        }

        false
    }

    fn replan_group(&mut self, w: &World, id: GroupId) -> Vec<AgentsState> {
        let starts = self.groups[&id].starting_positions.clone();
        self.max_group_size = self.max_group_size.max(starts.len());

        let mut current = AgentsState {
            agents: Vec::new(),
            next_agent: 0,
        };
        let mut goal = AgentsState {
            agents: Vec::new(),
            next_agent: 0,
        };
        for &pos in &starts {
            let agent = w
                .get_agent(pos)
                .unwrap_or_else(|| panic!("no agent at group start {}", pos));
            current.agents.push(AgentStateRecord {
                position: pos,
                id: agent.id(),
                action: AgentAction::Unassigned,
            });
            goal.agents.push(AgentStateRecord {
                position: agent.goal,
                id: agent.id(),
                action: AgentAction::Unassigned,
            });
        }

        let domain = OdDomain {
            start: current.clone(),
            tick: w.tick(),
            heuristics: &mut self.heuristics,
            predictor: self.predictor.clone(),
            threshold: self.obstacle_threshold,
        };
        let mut search = Search::new(domain, current.clone(), Some(goal), self.should_stop.clone());

        let mut result = if self.window > 0 {
            let bound = self.window * starts.len() as Cost;
            search.find_path_to_goal_or_window(w, bound)
        } else {
            search.find_path(w)
        };
        self.nodes_primary += search.nodes_expanded();

        if self.should_stop.load(AtomicOrdering::Relaxed) {
            return Vec::new();
        }

        // Only full states make it into the plan.
        result.retain(AgentsState::is_full);

        if result.is_empty() {
            // No plan found. A one-state all-stay plan keeps the group
            // visible to conflict checking and the reservation tables.
            debug!(group = id, "no plan found, staying put");
            result.push(current);
        }

        result
    }

    fn reserve_plan(&mut self, id: GroupId, start: Tick) {
        let group = &self.groups[&id];
        let plan = &group.plan;
        let mut time = start;

        for (si, state) in plan.iter().rev().enumerate() {
            let prev_state = (si > 0).then(|| &plan[plan.len() - si]);
            for (i, record) in state.agents.iter().enumerate() {
                let from = prev_state.map(|p| p.agents[i].position);
                self.reservations
                    .reserve(id, PositionTime::new(record.position, time), from);
            }
            time += 1;
        }

        if let Some(final_state) = plan.first() {
            for record in &final_state.agents {
                self.reservations
                    .reserve_permanent(id, record.position, time);
            }
        }
    }

    fn merge_groups(&mut self, ids: &[GroupId]) {
        let target = ids[0];
        self.reservations.unreserve(target);
        self.groups.get_mut(&target).unwrap().plan.clear();

        for &other in &ids[1..] {
            self.reservations.unreserve(other);
            let removed = self.groups.remove(&other).unwrap();
            self.groups
                .get_mut(&target)
                .unwrap()
                .starting_positions
                .extend(removed.starting_positions);
        }

        debug!(
            target,
            size = self.groups[&target].starting_positions.len(),
            "merged conflicting groups"
        );
    }
}

impl Solver for Od {
    fn name(&self) -> &'static str {
        "OD"
    }

    fn get_action(&mut self, w: World, _rng: &mut StdRng) -> JointAction {
        if let Some(predictor) = &self.predictor {
            predictor.borrow_mut().update_obstacles(&w);
        }

        let admissibility = self.plans_admissible(&w);
        if self.groups.is_empty() || admissibility != Admissibility::Admissible {
            if admissibility == Admissibility::Invalid {
                self.plan_invalid += 1;
            }
            self.replan(&w);
        }

        if self.should_stop.load(AtomicOrdering::Relaxed) {
            return JointAction::new();
        }

        let mut result = JointAction::new();
        for group in self.groups.values_mut() {
            if group.plan.len() < 2 {
                continue;
            }

            let current = group.plan.pop().unwrap();
            result.extend(make_action(&current, group.plan.last().unwrap()));
        }

        result
    }

    fn stat_names(&self) -> Vec<&'static str> {
        vec![
            "Replans",
            "Plan invalid",
            "Nodes primary",
            "Nodes heuristic",
            "Total nodes expanded",
            "Max group size",
        ]
    }

    fn stat_values(&self) -> Vec<String> {
        vec![
            self.replans.to_string(),
            self.plan_invalid.to_string(),
            self.nodes_primary.to_string(),
            self.nodes_heuristic.to_string(),
            (self.nodes_primary + self.nodes_heuristic).to_string(),
            self.max_group_size.to_string(),
        ]
    }

    fn get_path(&self, agent: AgentId) -> Vec<Position> {
        let mut result = Vec::new();
        for group in self.groups.values() {
            for state in group.plan.iter().rev() {
                for record in &state.agents {
                    if record.id == agent {
                        result.push(record.position);
                    }
                }
            }
        }
        result
    }

    fn get_obstacle_field(&self) -> HashMap<PositionTime, f64> {
        match &self.predictor {
            Some(predictor) => predictor.borrow().field().clone(),
            None => HashMap::new(),
        }
    }

    fn set_window(&mut self, window: u32) {
        self.window = window;
    }
}
